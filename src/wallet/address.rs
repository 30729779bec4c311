//! Destination address validation.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must start with one of {0:?}")]
    WrongPrefix(Vec<String>),
    #[error("address must be {expected} characters, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("address contains invalid character '{0}'")]
    InvalidCharacter(char),
}

/// Pluggable check of the target chain's address format.
pub trait AddressValidator: Send + Sync {
    fn validate(&self, address: &str) -> Result<(), AddressError>;
}

/// User-friendly TON address: `EQ`/`UQ` prefix, 48 base64 or base64url characters.
/// Checksum verification is left to stronger validators.
#[derive(Debug, Clone)]
pub struct TonAddressValidator {
    prefixes: Vec<String>,
    length: usize,
}

impl TonAddressValidator {
    pub fn new(prefixes: Vec<String>, length: usize) -> Self {
        Self { prefixes, length }
    }
}

impl Default for TonAddressValidator {
    fn default() -> Self {
        Self::new(vec!["EQ".to_string(), "UQ".to_string()], 48)
    }
}

impl AddressValidator for TonAddressValidator {
    fn validate(&self, address: &str) -> Result<(), AddressError> {
        if !self.prefixes.iter().any(|p| address.starts_with(p.as_str())) {
            return Err(AddressError::WrongPrefix(self.prefixes.clone()));
        }
        let actual = address.chars().count();
        if actual != self.length {
            return Err(AddressError::WrongLength {
                expected: self.length,
                actual,
            });
        }
        if let Some(c) = address
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '/')))
        {
            return Err(AddressError::InvalidCharacter(c));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(prefix: &str) -> String {
        format!("{prefix}{}", "A".repeat(46))
    }

    #[test]
    fn accepts_bounceable_and_non_bounceable() {
        let validator = TonAddressValidator::default();
        assert_eq!(validator.validate(&address("EQ")), Ok(()));
        assert_eq!(validator.validate(&address("UQ")), Ok(()));
        assert_eq!(
            validator.validate("EQD4FPq-PRDieyQKkizFTRtSDyucUIqrj0v_zXJmqaDp6_0t"),
            Ok(())
        );
    }

    #[test]
    fn rejects_wrong_prefix() {
        let validator = TonAddressValidator::default();
        assert!(matches!(
            validator.validate("XY1234"),
            Err(AddressError::WrongPrefix(_))
        ));
    }

    #[test]
    fn rejects_wrong_length() {
        let validator = TonAddressValidator::default();
        assert_eq!(
            validator.validate("EQ1234"),
            Err(AddressError::WrongLength {
                expected: 48,
                actual: 6
            })
        );
    }

    #[test]
    fn rejects_invalid_characters() {
        let validator = TonAddressValidator::default();
        let bad = format!("EQ{}!", "A".repeat(45));
        assert_eq!(validator.validate(&bad), Err(AddressError::InvalidCharacter('!')));
    }
}
