use thiserror::Error;

/// Failures the synthesis pipeline can surface to callers.
///
/// Cloneable so a job owner can broadcast the identical error to every
/// waiter attached to an in-flight synthesis.
#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    #[error("voice model not found: {0}")]
    ModelNotFound(String),

    #[error("no default voice configured")]
    NoDefaultConfigured,

    #[error("engine failed: {0}")]
    EngineFailure(String),

    #[error("engine timed out after {0}s")]
    EngineTimeout(u64),

    #[error("format conversion failed: {0}")]
    ConversionFailure(String),

    #[error("cache I/O error: {0}")]
    CacheIo(String),
}
