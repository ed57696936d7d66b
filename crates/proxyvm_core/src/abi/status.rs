//! Host status codes.

use crate::error::HostError;

/// Status code returned by every host call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    NotFound,
    BadArgument,
    SerializationFailure,
    ParseFailure,
    InvalidMemoryAccess,
    Empty,
    CasMismatch,
    InternalFailure,
    Unimplemented,
    /// Code outside the known ABI table.
    Other(u32),
}

impl Status {
    /// Decodes one raw ABI status code.
    pub fn from_raw(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::NotFound,
            2 => Self::BadArgument,
            3 => Self::SerializationFailure,
            4 => Self::ParseFailure,
            6 => Self::InvalidMemoryAccess,
            7 => Self::Empty,
            8 => Self::CasMismatch,
            10 => Self::InternalFailure,
            12 => Self::Unimplemented,
            other => Self::Other(other),
        }
    }

    /// Raw ABI status code.
    pub fn as_raw(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::NotFound => 1,
            Self::BadArgument => 2,
            Self::SerializationFailure => 3,
            Self::ParseFailure => 4,
            Self::InvalidMemoryAccess => 6,
            Self::Empty => 7,
            Self::CasMismatch => 8,
            Self::InternalFailure => 10,
            Self::Unimplemented => 12,
            Self::Other(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Classifies a non-success status into a [`HostError`].
    ///
    /// Codes without a dedicated classification collapse into
    /// `InternalFailure`: they indicate an ABI mismatch, never an expected
    /// absence of state.
    pub fn into_result(self) -> Result<(), HostError> {
        match self {
            Self::Ok => Ok(()),
            Self::NotFound => Err(HostError::NotFound),
            Self::Empty => Err(HostError::Empty),
            Self::BadArgument => Err(HostError::BadArgument),
            Self::SerializationFailure | Self::ParseFailure => Err(HostError::SerializationError),
            Self::CasMismatch => Err(HostError::CasMismatch),
            Self::InvalidMemoryAccess
            | Self::InternalFailure
            | Self::Unimplemented
            | Self::Other(_) => Err(HostError::InternalFailure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Status;
    use crate::error::HostError;

    #[test]
    fn raw_codes_survive_decoding() {
        for code in [0, 1, 2, 3, 4, 6, 7, 8, 10, 12, 99] {
            assert_eq!(Status::from_raw(code).as_raw(), code);
        }
    }

    #[test]
    fn classifies_expected_absence_separately_from_defects() {
        assert_eq!(Status::NotFound.into_result(), Err(HostError::NotFound));
        assert_eq!(Status::Empty.into_result(), Err(HostError::Empty));
        assert_eq!(
            Status::ParseFailure.into_result(),
            Err(HostError::SerializationError)
        );
        assert_eq!(
            Status::Other(42).into_result(),
            Err(HostError::InternalFailure)
        );
        assert_eq!(Status::Ok.into_result(), Ok(()));
    }
}
