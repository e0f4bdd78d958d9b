//! Extracted field — a value paired with the extractor's confidence in it.
//!
//! Every semantically extracted attribute (vendor names, prices, dates)
//! travels through the system as an `ExtractedField<T>`. The value is
//! optional because the upstream extractor returns null for fields it could
//! not find; confidence is always present and always in `[0, 1]`.

use serde::{Deserialize, Serialize};

/// A typed extracted value with its confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField<T> {
    pub value: Option<T>,
    pub confidence: f32,
}

impl<T> ExtractedField<T> {
    /// Field with a present value. Confidence is clamped into `[0, 1]`.
    pub fn new(value: T, confidence: f32) -> Self {
        Self {
            value: Some(value),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Field the extractor could not find. Confidence zero.
    pub fn absent() -> Self {
        Self {
            value: None,
            confidence: 0.0,
        }
    }

    /// A reviewer-asserted value. Confidence 1.0 by definition.
    pub fn corrected(value: T) -> Self {
        Self {
            value: Some(value),
            confidence: 1.0,
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn as_ref(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Confidence in range? Serde-deserialized fields bypass the clamping
    /// constructor, so validation re-checks this invariant.
    pub fn confidence_in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
    }
}

impl<T: Clone> ExtractedField<T> {
    pub fn cloned_value(&self) -> Option<T> {
        self.value.clone()
    }
}

impl<T> Default for ExtractedField<T> {
    fn default() -> Self {
        Self::absent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clamps_confidence_into_range() {
        let over = ExtractedField::new("x", 1.7);
        assert_eq!(over.confidence, 1.0);

        let under = ExtractedField::new("x", -0.2);
        assert_eq!(under.confidence, 0.0);
    }

    #[test]
    fn absent_field_has_zero_confidence() {
        let f: ExtractedField<f64> = ExtractedField::absent();
        assert!(!f.is_present());
        assert_eq!(f.confidence, 0.0);
    }

    #[test]
    fn corrected_field_is_fully_confident() {
        let f = ExtractedField::corrected(42.0);
        assert_eq!(f.cloned_value(), Some(42.0));
        assert_eq!(f.confidence, 1.0);
    }

    #[test]
    fn deserialized_out_of_range_confidence_detected() {
        let f: ExtractedField<String> =
            serde_json::from_str(r#"{"value": "ACME", "confidence": 1.4}"#).unwrap();
        assert!(!f.confidence_in_range());
    }

    #[test]
    fn round_trips_through_json() {
        let f = ExtractedField::new("SRV-001".to_string(), 0.92);
        let json = serde_json::to_string(&f).unwrap();
        let back: ExtractedField<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
