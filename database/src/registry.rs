/// We use `u8::MAX` as a separator; through the [`DatabaseStorePrefixes`] enum
/// we make sure it is never used as a store prefix as well.
pub const SEPARATOR: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DatabaseStorePrefixes {
    // ---- Storage engine ----
    Datasets = 1,
    ExistenceFlags = 2,

    // ---- Separator ----
    /// Reserved as a separator
    Separator = SEPARATOR,
}

impl TryFrom<u8> for DatabaseStorePrefixes {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Datasets),
            2 => Ok(Self::ExistenceFlags),
            SEPARATOR => Ok(Self::Separator),
            other => Err(other),
        }
    }
}

impl From<DatabaseStorePrefixes> for Vec<u8> {
    fn from(value: DatabaseStorePrefixes) -> Self {
        [value as u8].to_vec()
    }
}

impl From<DatabaseStorePrefixes> for u8 {
    fn from(value: DatabaseStorePrefixes) -> Self {
        value as u8
    }
}

impl AsRef<[u8]> for DatabaseStorePrefixes {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: enum has repr(u8)
        std::slice::from_ref(unsafe { &*(self as *const Self as *const u8) })
    }
}
