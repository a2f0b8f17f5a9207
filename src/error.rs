use thiserror::Error;

/// Permanent per-marker failure. A marker carrying one of these is excluded
/// from physics, end-condition checks and diagnostics, but is still written
/// back to the result array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum MarkerError {
    #[error("marker radius is not positive")]
    NonPositiveRadius,
    #[error("marker speed reaches the speed of light")]
    Superluminal,
    #[error("magnetic moment is negative or not finite")]
    UnphysicalMoment,
    #[error("marker state became non-finite")]
    NonFinite,
    #[error("adaptive step size underflowed")]
    StepUnderflow,
    #[error("background evaluation failed outside its domain")]
    OutsideDomain,
    #[error("marker representation does not match the integrator")]
    WrongRepresentation,
}

impl MarkerError {
    /// Non-zero code stored in persisted marker records.
    pub fn code(self) -> u32 {
        match self {
            MarkerError::NonPositiveRadius => 1,
            MarkerError::Superluminal => 2,
            MarkerError::UnphysicalMoment => 3,
            MarkerError::NonFinite => 4,
            MarkerError::StepUnderflow => 5,
            MarkerError::OutsideDomain => 6,
            MarkerError::WrongRepresentation => 7,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => MarkerError::NonPositiveRadius,
            2 => MarkerError::Superluminal,
            3 => MarkerError::UnphysicalMoment,
            4 => MarkerError::NonFinite,
            5 => MarkerError::StepUnderflow,
            6 => MarkerError::OutsideDomain,
            7 => MarkerError::WrongRepresentation,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_nonzero_and_roundtrip() {
        for err in [
            MarkerError::NonPositiveRadius,
            MarkerError::Superluminal,
            MarkerError::UnphysicalMoment,
            MarkerError::NonFinite,
            MarkerError::StepUnderflow,
            MarkerError::OutsideDomain,
            MarkerError::WrongRepresentation,
        ] {
            assert_ne!(err.code(), 0);
            assert_eq!(MarkerError::from_code(err.code()), Some(err));
        }
        assert_eq!(MarkerError::from_code(0), None);
    }
}
