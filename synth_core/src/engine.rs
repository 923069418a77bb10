use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::SynthesisError;
use crate::transcoder::{Transcoder, TranscoderCommand, TranscoderError};

/// Target telephony format: 8 kHz, mono, 16-bit linear PCM.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;
pub const TELEPHONY_CHANNELS: u32 = 1;
pub const TELEPHONY_BIT_DEPTH: u32 = 16;

/// Supervises the neural TTS engine subprocess.
///
/// The engine reads the text payload from stdin and writes a raw waveform
/// to the requested output path; exit code 0 means success.
pub struct PiperEngine {
    binary: PathBuf,
    runner: Arc<dyn Transcoder>,
    timeout: Duration,
}

impl PiperEngine {
    pub fn new(binary: impl Into<PathBuf>, runner: Arc<dyn Transcoder>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            runner,
            timeout,
        }
    }

    /// Synthesize `text` into a raw waveform at `raw_out`.
    ///
    /// The engine's length-scale parameter is the inverse of the requested
    /// speed: higher speed means a shorter length scale and faster speech.
    /// The caller owns eventual cleanup of the raw file.
    pub async fn invoke(
        &self,
        text: &str,
        model_path: &Path,
        speed: f64,
        raw_out: &Path,
    ) -> Result<(), SynthesisError> {
        if !model_path.is_file() {
            return Err(SynthesisError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let length_scale = 1.0 / speed;
        debug!(model = %model_path.display(), length_scale, "invoking engine");

        let cmd = TranscoderCommand {
            program: self.binary.clone(),
            args: vec![
                "--model".to_string(),
                model_path.display().to_string(),
                "--output_file".to_string(),
                raw_out.display().to_string(),
                "--length_scale".to_string(),
                length_scale.to_string(),
            ],
            stdin: Some(text.as_bytes().to_vec()),
            timeout: self.timeout,
        };

        match self.runner.run(cmd).await {
            Ok(_) => {
                if !raw_out.is_file() {
                    return Err(SynthesisError::EngineFailure(
                        "engine exited cleanly but produced no output file".to_string(),
                    ));
                }
                Ok(())
            }
            Err(TranscoderError::TimedOut { limit }) => {
                Err(SynthesisError::EngineTimeout(limit.as_secs()))
            }
            Err(e) => Err(SynthesisError::EngineFailure(e.to_string())),
        }
    }

    /// Probe the engine binary for availability. Used by health checks;
    /// never performs synthesis.
    pub async fn version(&self) -> Option<String> {
        let cmd = TranscoderCommand {
            program: self.binary.clone(),
            args: vec!["--version".to_string()],
            stdin: None,
            timeout: Duration::from_secs(5),
        };
        match self.runner.run(cmd).await {
            Ok(out) => {
                let version = if out.stdout.trim().is_empty() {
                    out.stderr.trim().to_string()
                } else {
                    out.stdout.trim().to_string()
                };
                Some(version)
            }
            Err(_) => None,
        }
    }
}

/// Supervises the sample-rate/format conversion subprocess.
///
/// Transcodes whatever the engine natively emits into the fixed telephony
/// format required for voice-network playback.
pub struct SoxConverter {
    binary: PathBuf,
    runner: Arc<dyn Transcoder>,
    timeout: Duration,
}

impl SoxConverter {
    pub fn new(binary: impl Into<PathBuf>, runner: Arc<dyn Transcoder>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            runner,
            timeout,
        }
    }

    /// Convert `input` into the telephony format at `output`. The input
    /// file is left in place; deleting it is the caller's job.
    pub async fn convert(&self, input: &Path, output: &Path) -> Result<(), SynthesisError> {
        if !input.is_file() {
            return Err(SynthesisError::ConversionFailure(format!(
                "input file missing: {}",
                input.display()
            )));
        }

        let cmd = TranscoderCommand {
            program: self.binary.clone(),
            args: vec![
                input.display().to_string(),
                "-r".to_string(),
                TELEPHONY_SAMPLE_RATE.to_string(),
                "-c".to_string(),
                TELEPHONY_CHANNELS.to_string(),
                "-b".to_string(),
                TELEPHONY_BIT_DEPTH.to_string(),
                output.display().to_string(),
            ],
            stdin: None,
            timeout: self.timeout,
        };

        self.runner
            .run(cmd)
            .await
            .map(|_| ())
            .map_err(|e| SynthesisError::ConversionFailure(e.to_string()))
    }
}
