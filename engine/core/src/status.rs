use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Status codes reported across the gateway boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Status {
    Success = 200,
    Processing = 202,
    InvalidData = 400,
    NotFound = 404,
    NotAllowed = 405,
    AlreadyExists = 409,
}

impl Status {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// `Processing` is informational, not a failure
    pub fn is_error(self) -> bool {
        matches!(self, Self::InvalidData | Self::NotFound | Self::NotAllowed | Self::AlreadyExists)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.code(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(Status::Success.code(), 200);
        assert_eq!(Status::Processing.code(), 202);
        assert_eq!(Status::AlreadyExists.code(), 409);
        assert!(!Status::Processing.is_error());
        assert!(Status::NotFound.is_error());
    }
}
