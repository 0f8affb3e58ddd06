pub mod datasets;
pub mod flags;

use std::fmt::Display;
use trellis_engine_core::Didentifier;

/// Fixed-width store key derived from a dataset identifier
#[derive(Eq, Hash, PartialEq, Debug, Copy, Clone)]
pub struct DatasetKey([u8; 8]);

impl From<Didentifier> for DatasetKey {
    fn from(didentifier: Didentifier) -> Self {
        Self(didentifier.to_le_bytes())
    }
}

impl From<DatasetKey> for Didentifier {
    fn from(key: DatasetKey) -> Self {
        Self::from_le_bytes(key.0)
    }
}

impl AsRef<[u8]> for DatasetKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for DatasetKey {
    type Error = std::array::TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(value.try_into()?))
    }
}

impl Display for DatasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&Didentifier::from(*self), f)
    }
}
