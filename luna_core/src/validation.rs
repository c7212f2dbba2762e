use crate::error::TtsError;
use crate::MAX_TEXT_LENGTH;

/// Validate a synthesis request before anything touches the network.
///
/// Out-of-range sampling parameters are rejected rather than clamped;
/// the engine documents the ranges but not its own behavior outside
/// them.
pub fn validate_request(text: &str, top_p: f64, repetition_penalty: f64) -> Result<(), TtsError> {
    if text.is_empty() {
        return Err(TtsError::InvalidRequest("text cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(TtsError::InvalidRequest(format!(
            "text too long (max {} characters). Split your text into smaller segments.",
            MAX_TEXT_LENGTH
        )));
    }

    if !(0.0..=1.0).contains(&top_p) {
        return Err(TtsError::InvalidRequest(format!(
            "top_p must be within 0.0-1.0 (got {top_p})"
        )));
    }
    if !(1.0..=2.0).contains(&repetition_penalty) {
        return Err(TtsError::InvalidRequest(format!(
            "repetition_penalty must be within 1.0-2.0 (got {repetition_penalty})"
        )));
    }

    Ok(())
}
