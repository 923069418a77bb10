use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer,
};
use tracing::{info, warn};

use server::config::ServerConfig;
use server::routes::{app, mark_started, AppState};
use synth_core::{
    CacheStore, PiperEngine, ProcessTranscoder, SoxConverter, SynthesisPipeline, Transcoder,
    VoiceRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting telephony TTS gateway...");

    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, engine_timeout={}s",
        config.port, config.rate_limit_per_minute, config.engine_timeout_secs
    );

    let voices = match &config.voice_map {
        Some(path) => VoiceRegistry::from_mapfile(path, &config.voices_dir).unwrap_or_else(|e| {
            warn!("Could not load voice map {}: {e}, using built-in voices.", path.display());
            VoiceRegistry::with_defaults(&config.voices_dir)
        }),
        None => VoiceRegistry::with_defaults(&config.voices_dir),
    };
    info!("Loaded {} logical voices", voices.logical_map().len());

    let runner: Arc<dyn Transcoder> = Arc::new(ProcessTranscoder);
    let pipeline = Arc::new(SynthesisPipeline::new(
        voices,
        CacheStore::new(&config.cache_dir)?,
        PiperEngine::new(&config.engine_binary, runner.clone(), config.engine_timeout()),
        SoxConverter::new(&config.converter_binary, runner, config.converter_timeout()),
        &config.scratch_dir,
        &config.output_dir,
    )?
    .with_output_ttl(config.output_ttl()));

    // Warmup runs in the background so startup latency stays flat; a
    // failure here is logged and the first real request retries.
    {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.warmup().await });
    }

    mark_started();
    let state = AppState::new(pipeline);

    // CORS configuration - environment-aware
    let cors = if let Some(ref allowed_origins) = config.cors_allowed_origins {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin: &String| origin.parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
            permissive_cors()
        } else {
            info!("CORS configured for {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(tower_http::cors::AllowOrigin::list(origins))
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(tower_http::cors::Any)
                .allow_credentials(false)
        }
    } else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        permissive_cors()
    };

    // Global rate limit; GlobalKeyExtractor works behind Docker/proxies
    // where per-IP extraction is unreliable.
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second((config.rate_limit_per_minute / 60).max(1) as u64)
            .burst_size(config.rate_limit_per_minute)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .unwrap(),
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    // Request ID middleware for tracing
    async fn add_request_id(mut request: Request, next: Next) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        request.headers_mut().insert(
            "x-request-id",
            axum::http::HeaderValue::from_str(&request_id).unwrap(),
        );
        let mut response = next.run(request).await;
        response.headers_mut().insert(
            "x-request-id",
            axum::http::HeaderValue::from_str(&request_id).unwrap(),
        );
        response
    }

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors)
        .into_inner();

    let api = app(state);
    let router = Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, router).await?;
    Ok(())
}

fn permissive_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false)
}
