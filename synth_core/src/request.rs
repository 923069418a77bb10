use thiserror::Error;

/// Maximum text length for a synthesis request, in characters.
pub const MAX_TEXT_CHARS: usize = 1000;
/// Allowed speech speed range.
pub const MIN_SPEED: f64 = 0.5;
pub const MAX_SPEED: f64 = 2.0;

/// Rejections raised while constructing a [`SynthesisRequest`].
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Text cannot be empty")]
    EmptyText,

    #[error("Text too long (max {MAX_TEXT_CHARS} characters)")]
    TextTooLong,

    #[error("Speed must be between {MIN_SPEED} and {MAX_SPEED}")]
    SpeedOutOfRange,
}

/// A validated synthesis request.
///
/// Construction is the only way to obtain one, so the pipeline never sees
/// out-of-contract input. Immutable once accepted.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    text: String,
    voice: String,
    speed: f64,
    use_cache: bool,
}

impl SynthesisRequest {
    pub fn new(
        text: String,
        voice: String,
        speed: f64,
        use_cache: bool,
    ) -> Result<Self, ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(ValidationError::TextTooLong);
        }
        // NaN fails the range check as well.
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(ValidationError::SpeedOutOfRange);
        }
        Ok(Self {
            text,
            voice,
            speed,
            use_cache,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str, speed: f64) -> Result<SynthesisRequest, ValidationError> {
        SynthesisRequest::new(text.to_string(), "default".to_string(), speed, true)
    }

    #[test]
    fn test_accepts_valid_request() {
        let req = request("Hello", 1.0).unwrap();
        assert_eq!(req.text(), "Hello");
        assert_eq!(req.voice(), "default");
        assert!(req.use_cache());
    }

    #[test]
    fn test_rejects_empty_and_whitespace_text() {
        assert!(matches!(request("", 1.0), Err(ValidationError::EmptyText)));
        assert!(matches!(
            request("   \t\n", 1.0),
            Err(ValidationError::EmptyText)
        ));
    }

    #[test]
    fn test_text_length_boundary() {
        let exactly_max = "a".repeat(MAX_TEXT_CHARS);
        assert!(request(&exactly_max, 1.0).is_ok());

        let one_over = "a".repeat(MAX_TEXT_CHARS + 1);
        assert!(matches!(
            request(&one_over, 1.0),
            Err(ValidationError::TextTooLong)
        ));
    }

    #[test]
    fn test_speed_boundaries() {
        assert!(request("hi", 0.5).is_ok());
        assert!(request("hi", 2.0).is_ok());
        assert!(matches!(
            request("hi", 0.49),
            Err(ValidationError::SpeedOutOfRange)
        ));
        assert!(matches!(
            request("hi", 2.01),
            Err(ValidationError::SpeedOutOfRange)
        ));
        assert!(request("hi", f64::NAN).is_err());
    }
}
