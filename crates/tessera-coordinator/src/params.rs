//! Module parameters

use serde::{Deserialize, Serialize};

use crate::error::{Result, TssError};

/// Tunables shared by every validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Largest group that may be created
    pub max_group_size: u64,

    /// Largest DE queue per address
    pub max_de_size: u64,

    /// Blocks a group may stay in DKG before it expires
    pub creation_period: u64,

    /// Blocks an assigned member has to submit a partial signature
    pub signing_period: u64,

    /// Attempts before a signing falls
    pub max_signing_attempt: u64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_group_size: 20,
            max_de_size: 100,
            creation_period: 30_000,
            signing_period: 100,
            max_signing_attempt: 5,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_group_size", self.max_group_size),
            ("max_de_size", self.max_de_size),
            ("creation_period", self.creation_period),
            ("signing_period", self.signing_period),
            ("max_signing_attempt", self.max_signing_attempt),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(TssError::InvalidParams(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        let params = Params::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.max_de_size, 100);
    }

    #[test]
    fn test_zero_period_rejected() {
        let params = Params {
            signing_period: 0,
            ..Params::default()
        };
        assert!(matches!(params.validate(), Err(TssError::InvalidParams(_))));
    }
}
