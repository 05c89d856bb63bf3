//! Replay engine worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mre_events::RedisEventBus;
use mre_media::{HttpRenderer, RenderConfig};
use mre_plane::PlaneClient;
use mre_storage::{S3Client, S3FeatureCache};
use mre_worker::{EngineContext, EventExecutor, ReplayEngine, WorkerConfig};

fn fail(what: &str, err: impl std::fmt::Display) -> ! {
    error!("Failed to create {}: {}", what, err);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("mre=info".parse().expect("valid directive"))
        .add_directive("aws_config=warn".parse().expect("valid directive"))
        .add_directive("hyper=warn".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting mre-worker");

    let mut config = WorkerConfig::from_env();

    if let Some(port) = config.metrics_port {
        if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
        {
            fail("metrics exporter", e);
        }
        info!("Prometheus metrics on port {}", port);
    }

    let s3 = match S3Client::from_env().await {
        Ok(s3) => s3,
        Err(e) => fail("feature cache client", e),
    };
    if let Err(e) = s3.check_connectivity().await {
        warn!("Feature cache check failed, continuing: {}", e);
    }
    let plane = match PlaneClient::from_env() {
        Ok(p) => Arc::new(p),
        Err(e) => fail("control plane client", e),
    };
    let render_config = match RenderConfig::from_env() {
        Ok(c) => c,
        Err(e) => fail("renderer config", e),
    };
    config.engine.output_prefix = render_config.output_prefix.clone();
    let renderer = match HttpRenderer::new(render_config) {
        Ok(r) => Arc::new(r),
        Err(e) => fail("renderer client", e),
    };
    let bus = match RedisEventBus::from_env() {
        Ok(b) => Arc::new(b),
        Err(e) => fail("lifecycle event bus", e),
    };
    info!("Worker config: {:?}", config);

    let engine = ReplayEngine::new(EngineContext {
        plane: plane.clone(),
        segments: plane.clone(),
        chunks: plane,
        cache: Arc::new(S3FeatureCache::new(s3)),
        bus: bus.clone(),
        renderer,
        settings: config.engine.clone(),
    });

    let executor = Arc::new(EventExecutor::new(config, bus, engine));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
