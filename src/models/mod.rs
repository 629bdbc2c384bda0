use serde::{Deserialize, Serialize};

pub mod entry;
pub mod matching;
pub mod report;

// Re-exports for convenience
pub use entry::*;
pub use matching::*;
pub use report::*;

// Common enums used across models

/// Stock state of a listing. Kept separate from the price so that a
/// sold-out entry never has to fake a zero price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    SoldOut,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_serialization() {
        assert_eq!(
            serde_json::to_string(&Availability::InStock).unwrap(),
            "\"in_stock\""
        );
        assert_eq!(
            serde_json::to_string(&Availability::SoldOut).unwrap(),
            "\"sold_out\""
        );
        assert_eq!(
            serde_json::to_string(&Availability::Unknown).unwrap(),
            "\"unknown\""
        );
    }

    #[test]
    fn test_availability_roundtrip() {
        let values = vec![
            Availability::InStock,
            Availability::SoldOut,
            Availability::Unknown,
        ];
        for value in values {
            let serialized = serde_json::to_string(&value).unwrap();
            let deserialized: Availability = serde_json::from_str(&serialized).unwrap();
            assert_eq!(value, deserialized);
        }
    }
}
