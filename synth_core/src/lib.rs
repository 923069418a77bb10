pub mod cache;
pub mod engine;
pub mod error;
pub mod request;
pub mod transcoder;
pub mod voices;

pub use cache::{derive_key, CacheStore};
pub use engine::{
    PiperEngine, SoxConverter, TELEPHONY_BIT_DEPTH, TELEPHONY_CHANNELS, TELEPHONY_SAMPLE_RATE,
};
pub use error::SynthesisError;
pub use request::{SynthesisRequest, ValidationError, MAX_TEXT_CHARS, MAX_SPEED, MIN_SPEED};
pub use transcoder::{
    ProcessTranscoder, Transcoder, TranscoderCommand, TranscoderError, TranscoderOutput,
};
pub use voices::{VoiceRegistry, DEFAULT_VOICE};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

type JobResult = Result<PathBuf, SynthesisError>;

/// Canned phrase synthesized at startup to surface engine misconfiguration
/// early.
const WARMUP_PHRASE: &str = "Welcome to our voice service.";

/// Outcome of claiming the per-key job slot: either this request owns the
/// synthesis, or it attaches to one already running.
enum JobSlot {
    Owner(watch::Sender<Option<JobResult>>),
    Waiter(watch::Receiver<Option<JobResult>>),
}

/// The synthesis-and-cache pipeline.
///
/// Coordinates cache lookup, engine invocation, format conversion, and
/// cache population, guaranteeing at most one concurrent synthesis per
/// cache key. Constructed once at process start and shared by handle.
pub struct SynthesisPipeline {
    voices: VoiceRegistry,
    cache: CacheStore,
    engine: PiperEngine,
    converter: SoxConverter,
    scratch_dir: PathBuf,
    output_dir: PathBuf,
    output_ttl: Duration,
    // key -> receiver for the in-flight job's broadcast. The entry API
    // gives an atomic insert-if-absent, so "is there a job?" and "create
    // a job" cannot race.
    jobs: DashMap<String, watch::Receiver<Option<JobResult>>>,
}

impl SynthesisPipeline {
    pub fn new(
        voices: VoiceRegistry,
        cache: CacheStore,
        engine: PiperEngine,
        converter: SoxConverter,
        scratch_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, SynthesisError> {
        let scratch_dir = scratch_dir.into();
        let output_dir = output_dir.into();
        for dir in [&scratch_dir, &output_dir] {
            fs::create_dir_all(dir)
                .map_err(|e| SynthesisError::CacheIo(format!("create {}: {e}", dir.display())))?;
        }
        Ok(Self {
            voices,
            cache,
            engine,
            converter,
            scratch_dir,
            output_dir,
            output_ttl: Duration::from_secs(3600),
            jobs: DashMap::new(),
        })
    }

    /// Retention limit for the most-recent-outputs area.
    pub fn with_output_ttl(mut self, ttl: Duration) -> Self {
        self.output_ttl = ttl;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn voices(&self) -> &VoiceRegistry {
        &self.voices
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Engine availability probe for health reporting.
    pub async fn engine_version(&self) -> Option<String> {
        self.engine.version().await
    }

    /// Synthesize speech for a validated request, returning the path of a
    /// finished telephony-format artifact.
    ///
    /// Cache hits return immediately. On a miss, concurrent requests for
    /// the same key share a single engine invocation: the first request
    /// owns the job, the rest await its broadcast and observe the identical
    /// result.
    pub async fn synthesize(self: &Arc<Self>, request: &SynthesisRequest) -> JobResult {
        let model_path = self.voices.resolve(request.voice())?;
        // Keyed on the logical voice name as given, not the resolved model,
        // so aliases occupy distinct cache slots.
        let key = derive_key(request.text(), request.voice(), request.speed());

        if request.use_cache() {
            if let Some(hit) = self.cache.lookup(&key) {
                debug!(%key, "cache hit");
                return Ok(hit);
            }
        }

        let tx = match self.claim_job(&key) {
            JobSlot::Owner(tx) => tx,
            JobSlot::Waiter(mut rx) => {
                debug!(%key, "joining in-flight synthesis");
                let outcome = rx.wait_for(|v| v.is_some()).await.map_err(|_| {
                    SynthesisError::EngineFailure(
                        "synthesis job ended without reporting a result".to_string(),
                    )
                })?;
                return match outcome.as_ref() {
                    Some(result) => result.clone(),
                    None => Err(SynthesisError::EngineFailure(
                        "synthesis job ended without reporting a result".to_string(),
                    )),
                };
            }
        };

        // The job runs on a detached task: an abandoning caller (client
        // disconnect drops this future) must not cancel work the other
        // waiters and the cache population depend on.
        let this = Arc::clone(self);
        let text = request.text().to_string();
        let speed = request.speed();
        let job_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = this.run_job(&job_key, &text, &model_path, speed).await;
            // Remove the job record before broadcasting so a failed outcome
            // is never served to a request arriving after completion; late
            // joiners holding the receiver still observe the result.
            this.jobs.remove(&job_key);
            let _ = tx.send(Some(result.clone()));
            result
        });

        handle.await.unwrap_or_else(|e| {
            Err(SynthesisError::EngineFailure(format!(
                "synthesis task failed: {e}"
            )))
        })
    }

    /// Best-effort startup synthesis of a canned phrase. Failure is logged,
    /// never fatal; the first real request retries lazily.
    pub async fn warmup(self: &Arc<Self>) {
        let request = match SynthesisRequest::new(
            WARMUP_PHRASE.to_string(),
            DEFAULT_VOICE.to_string(),
            1.0,
            true,
        ) {
            Ok(request) => request,
            Err(_) => return,
        };
        match self.synthesize(&request).await {
            Ok(path) => info!(path = %path.display(), "warmup synthesis complete"),
            Err(e) => warn!("warmup failed (will retry on first request): {e}"),
        }
    }

    fn claim_job(&self, key: &str) -> JobSlot {
        match self.jobs.entry(key.to_string()) {
            Entry::Occupied(entry) => JobSlot::Waiter(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                JobSlot::Owner(tx)
            }
        }
    }

    async fn run_job(&self, key: &str, text: &str, model_path: &Path, speed: f64) -> JobResult {
        self.sweep_outputs();

        let raw_path = self.scratch_dir.join(format!("{key}_raw.wav"));
        let out_path = self.output_dir.join(format!("{key}.wav"));

        let result = self
            .run_stages(key, text, model_path, speed, &raw_path, &out_path)
            .await;

        // Scratch cleanup happens whatever the outcome.
        if raw_path.exists() {
            if let Err(e) = fs::remove_file(&raw_path) {
                warn!(path = %raw_path.display(), "failed to remove scratch file: {e}");
            }
        }
        result
    }

    async fn run_stages(
        &self,
        key: &str,
        text: &str,
        model_path: &Path,
        speed: f64,
        raw_path: &Path,
        out_path: &Path,
    ) -> JobResult {
        info!(key, chars = text.chars().count(), "synthesizing");
        self.engine.invoke(text, model_path, speed, raw_path).await?;
        self.converter.convert(raw_path, out_path).await?;
        // The converted file stays in the outputs area for the caller; a
        // copy is promoted into the durable cache so clearing the cache
        // never removes a file a client may still be reading.
        self.cache.put(key, out_path)?;
        Ok(out_path.to_path_buf())
    }

    /// Best-effort sweep of the most-recent-outputs area: files older than
    /// the retention TTL are deleted, bounding its growth.
    fn sweep_outputs(&self) {
        let Ok(entries) = fs::read_dir(&self.output_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .is_some_and(|age| age > self.output_ttl);
            if stale {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(path = %entry.path().display(), "failed to sweep output file: {e}");
                }
            }
        }
    }
}
