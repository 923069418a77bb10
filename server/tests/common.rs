//! Common utilities for integration tests

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tempfile::TempDir;

use server::routes::{app, AppState};
use synth_core::{
    CacheStore, PiperEngine, SoxConverter, SynthesisPipeline, Transcoder, TranscoderCommand,
    TranscoderError, TranscoderOutput, VoiceRegistry,
};

/// Stand-in for the piper and sox binaries: writes a placeholder artifact
/// to the command's output path and counts engine invocations.
#[derive(Default)]
pub struct StubTranscoder {
    engine_calls: AtomicUsize,
}

impl StubTranscoder {
    pub fn engine_calls(&self) -> usize {
        self.engine_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn run(&self, cmd: TranscoderCommand) -> Result<TranscoderOutput, TranscoderError> {
        if cmd.args.iter().any(|a| a == "--version") {
            return Ok(TranscoderOutput {
                stdout: "stub 1.0.0".to_string(),
                stderr: String::new(),
            });
        }
        let out = if let Some(i) = cmd.args.iter().position(|a| a == "--output_file") {
            self.engine_calls.fetch_add(1, Ordering::SeqCst);
            cmd.args[i + 1].clone()
        } else if let Some(last) = cmd.args.last() {
            last.clone()
        } else {
            return Err(TranscoderError::Spawn {
                program: cmd.program.display().to_string(),
                message: "no output path in args".to_string(),
            });
        };
        fs::write(&out, b"RIFF").map_err(|e| TranscoderError::Spawn {
            program: cmd.program.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(TranscoderOutput::default())
    }
}

pub struct TestApp {
    pub app: Router,
    pub transcoder: Arc<StubTranscoder>,
    _root: TempDir,
}

/// Create a test app instance over temporary directory roots and a stub
/// transcoder, so no real subprocesses run.
pub fn create_test_app() -> TestApp {
    let root = TempDir::new().unwrap();
    let model_dir = root.path().join("voices");
    fs::create_dir_all(&model_dir).unwrap();
    fs::write(model_dir.join("en_US-lessac-medium.onnx"), b"onnx").unwrap();

    let transcoder = Arc::new(StubTranscoder::default());
    let runner: Arc<dyn Transcoder> = transcoder.clone();

    let pipeline = SynthesisPipeline::new(
        VoiceRegistry::with_defaults(&model_dir),
        CacheStore::new(root.path().join("cache")).unwrap(),
        PiperEngine::new("/opt/piper/piper/piper", runner.clone(), Duration::from_secs(30)),
        SoxConverter::new("sox", runner, Duration::from_secs(10)),
        root.path().join("scratch"),
        root.path().join("output"),
    )
    .unwrap();

    TestApp {
        app: app(AppState::new(Arc::new(pipeline))),
        transcoder,
        _root: root,
    }
}
