use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use synth_core::{SynthesisPipeline, SynthesisRequest};
use tracing::info;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SynthesisPipeline>,
    pub request_count: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(pipeline: Arc<SynthesisPipeline>) -> Self {
        Self {
            pipeline,
            request_count: Arc::new(AtomicU64::new(0)),
        }
    }
}

fn default_voice() -> String {
    "default".to_string()
}

fn default_speed() -> f64 {
    1.0
}

fn default_cache() -> bool {
    true
}

#[derive(Deserialize)]
pub struct TtsRequest {
    text: String,
    #[serde(default = "default_voice")]
    voice: String,
    #[serde(default = "default_speed")]
    speed: f64,
    #[serde(default = "default_cache")]
    cache: bool,
}

#[derive(Serialize)]
pub struct TtsResponse {
    success: bool,
    file_path: String,
    message: String,
}

#[derive(Deserialize)]
pub struct PhraseParams {
    text: String,
    #[serde(default = "default_voice")]
    voice: String,
}

#[derive(Serialize)]
pub struct VoicesResponse {
    voices: BTreeMap<String, String>,
    available_models: Vec<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    engine: Option<String>,
    voices: Vec<String>,
    cache_dir: String,
    output_dir: String,
}

#[derive(Serialize)]
pub struct ClearCacheResponse {
    success: bool,
    cleared: usize,
    message: String,
}

/// Build the API router. Middleware is layered on by the binary so tests
/// can exercise the bare routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/voices", get(list_voices))
        .route("/tts", post(tts_endpoint))
        .route("/tts/phrase", post(phrase_endpoint))
        .route("/cache/clear", get(clear_cache))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

pub async fn tts_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Json<TtsResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let request = SynthesisRequest::new(req.text, req.voice, req.speed, req.cache)?;
    let path = state.pipeline.synthesize(&request).await?;

    Ok(Json(TtsResponse {
        success: true,
        file_path: path.display().to_string(),
        message: "Speech synthesized successfully".to_string(),
    }))
}

/// Quick TTS for common phrases: fixed speed, always cached.
pub async fn phrase_endpoint(
    State(state): State<AppState>,
    Query(params): Query<PhraseParams>,
) -> Result<Json<TtsResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let request = SynthesisRequest::new(params.text, params.voice, 1.0, true)?;
    let path = state.pipeline.synthesize(&request).await?;

    Ok(Json(TtsResponse {
        success: true,
        file_path: path.display().to_string(),
        message: String::new(),
    }))
}

pub async fn list_voices(State(state): State<AppState>) -> Json<VoicesResponse> {
    let registry = state.pipeline.voices();
    Json(VoicesResponse {
        voices: registry.logical_map().clone(),
        available_models: registry.available_models(),
    })
}

pub async fn clear_cache(State(state): State<AppState>) -> Result<Json<ClearCacheResponse>, ApiError> {
    let cleared = state.pipeline.cache().clear()?;
    info!(cleared, "cache cleared via API");
    Ok(Json(ClearCacheResponse {
        success: true,
        cleared,
        message: format!("Cleared {cleared} cached files"),
    }))
}

/// Reports engine availability and model presence; performs no synthesis.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine = state.pipeline.engine_version().await;
    let voices = state.pipeline.voices().available_models();
    let status = if engine.is_some() && !voices.is_empty() {
        "healthy"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status,
        engine,
        voices,
        cache_dir: state.pipeline.cache().root().display().to_string(),
        output_dir: state.pipeline.output_dir().display().to_string(),
    })
}

pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "Telephony TTS Gateway",
        "engine": "Piper (Neural TTS)",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "/tts": "POST - Text to speech synthesis",
            "/tts/phrase": "POST - Quick phrase synthesis",
            "/voices": "GET - List available voices",
            "/health": "GET - Health check",
            "/cache/clear": "GET - Clear cache",
            "/metrics": "GET - Process metrics"
        }
    }))
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
}

static START_TIME: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

/// Record process start for uptime reporting.
pub fn mark_started() {
    let _ = START_TIME.get_or_init(std::time::Instant::now);
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_usage = system.global_cpu_info().cpu_usage();
    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(MetricsResponse {
        cpu_usage_percent: cpu_usage,
        memory_used_mb: memory_used / 1024 / 1024,
        memory_total_mb: memory_total / 1024 / 1024,
        memory_usage_percent,
        request_count: state.request_count.load(Ordering::Relaxed),
        uptime_seconds: uptime,
    })
}
