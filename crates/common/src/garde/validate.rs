//! Payload validation through garde.

use crate::domain::DomainError;
use garde::{Report, Validate};

/// Run garde rules and fold any violations into a single `ValidationError`
pub fn validate_struct<T>(value: &T) -> Result<(), DomainError>
where
    T: Validate,
    T::Context: Default,
{
    value
        .validate()
        .map_err(|report| DomainError::ValidationError(describe_report(&report)))
}

/// Render violations as `path: message` pairs in field order
fn describe_report(report: &Report) -> String {
    let mut violations: Vec<String> = report
        .iter()
        .map(|(path, error)| {
            let path = path.to_string();
            if path.is_empty() {
                error.message().to_string()
            } else {
                format!("{}: {}", path, error.message())
            }
        })
        .collect();
    violations.sort();
    violations.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use garde::Validate;

    #[derive(Validate)]
    struct NewBeneficiary {
        #[garde(length(chars, min = 1, max = 100))]
        name: String,
        #[garde(range(min = 0))]
        age: i32,
    }

    #[test]
    fn test_valid_payload_passes() {
        let payload = NewBeneficiary {
            name: "Jane".to_string(),
            age: 25,
        };
        assert!(validate_struct(&payload).is_ok());
    }

    #[test]
    fn test_every_violation_is_reported() {
        let payload = NewBeneficiary {
            name: String::new(),
            age: -1,
        };
        match validate_struct(&payload) {
            Err(DomainError::ValidationError(msg)) => {
                assert!(msg.contains("name"));
                assert!(msg.contains("age"));
            }
            other => panic!("expected ValidationError, got {:?}", other),
        }
    }
}
