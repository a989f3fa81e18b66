//! Gateway core binary: composition root + HTTP server.
//!
//! Builds a validated [`gateway_core::config::Config`], wires the
//! collaborator adapters, and serves the `/api/v1` contract over axum.
//! Exit codes: `0` normal, `2` fatal config error, `3` shared-store
//! unreachable at boot.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{middleware as axum_mw, routing::get, Router};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway_core::app::{Collaborators, Core};
use gateway_core::clock::{SystemClock, UuidGenerator};
use gateway_core::collab::{
    InMemoryDurableStore, InMemoryModelRepository, InMemorySharedKv, NoopNotificationOutbox,
};
use gateway_core::config::Config;
use gateway_core::middleware::{RateLimitConfig, RateLimitLayer};
use gateway_core::{api, auth, middleware as core_middleware};

/// Gateway core: the request-processing substrate of the embedded-finance
/// platform. Wires the collaborator adapters and serves `/api/v1`.
#[derive(Parser, Debug)]
#[command(name = "gateway-core")]
struct Cli {
    /// Path to a TOML config file; falls back to built-in defaults when absent.
    #[arg(long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Wire collaborator adapters to in-memory fakes instead of production
    /// backends. Collaborators are interfaces, never a runtime mock-mode
    /// flag sprinkled through call sites — this flag only selects which
    /// adapter set the composition root builds.
    #[arg(long)]
    mock_collaborators: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "fatal configuration error");
            return ExitCode::from(2);
        }
    };

    match run(config, cli.mock_collaborators).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "gateway core exited with error");
            ExitCode::FAILURE
        }
    }
}

/// Renders the Prometheus text-exposition format for dashboards. Distinct
/// from the stable `GET /api/v1/metrics` JSON contract external callers
/// parse; this one feeds the ops scrape endpoint only.
async fn render_prometheus(handle: PrometheusHandle) -> String {
    handle.render()
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => {
            let config = Config::default();
            config.validate()?;
            config
        }
    };
    Ok(config)
}

async fn run(config: Config, mock_collaborators: bool) -> Result<()> {
    info!(mock_collaborators, "starting gateway core");

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let clock = Arc::new(SystemClock::new());
    let shared_kv = Arc::new(InMemorySharedKv::default());

    // Exit code 3: boot fails fast if the shared store cannot be reached
    // at all, rather than silently degrading to local-only from the first
    // request. The in-memory fake never fails this check; a production
    // adapter's boot call is where this would actually fire.
    if let Err(err) = shared_kv.get("__boot_check__").await {
        error!(error = %err, "shared store unreachable at boot");
        std::process::exit(3);
    }

    let _ = mock_collaborators; // only adapter set wired today; flag reserved for production adapters

    let collaborators = Collaborators {
        durable_store: Arc::new(InMemoryDurableStore::new(vec![gateway_core::rules::structuring_block_rule()])),
        shared_kv,
        model_repository: Arc::new(InMemoryModelRepository::default()),
        notifications: Arc::new(NoopNotificationOutbox),
        clock: clock.clone(),
        id_generator: Arc::new(UuidGenerator),
    };

    let core = Arc::new(Core::new(config, collaborators).await?);
    spawn_background_tasks(core.clone());

    let jwt_handler = core.jwt.clone();
    let protected = api::protected_router()
        .layer(axum_mw::from_fn_with_state(jwt_handler, auth::auth_middleware));

    // Network-layer per-IP throttle, independent of and coarser than the
    // identity/route-class limiter: a defense-in-depth backstop against a
    // single source hammering the listener before any identity is even
    // known.
    let ip_limiter = RateLimitLayer::new(RateLimitConfig::default());

    let app = Router::new()
        .merge(api::public_router())
        .merge(protected)
        .route("/health", get(api::routes::health))
        .route("/metrics/prometheus", get(move || render_prometheus(prometheus_handle.clone())))
        .layer(axum_mw::from_fn_with_state(ip_limiter, core_middleware::rate_limit_middleware))
        .layer(CorsLayer::permissive())
        .layer(axum_mw::from_fn(core_middleware::request_logging_simple))
        .with_state(core.clone());

    let listen_addr = core.config.listen_addr.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!(addr = %listen_addr, "gateway core listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Starts the per-process ticker tasks the concurrency model requires:
/// one aggregator slide ticker and one telemetry alert-evaluation
/// ticker. Both run independently of any request.
fn spawn_background_tasks(core: Arc<Core>) {
    let aggregator = core.aggregator.clone();
    let clock = core.clock.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            let now_millis = clock.now().wall.timestamp_millis().max(0) as u64;
            aggregator.tick_all(now_millis);
        }
    });

    let telemetry = core.telemetry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            for endpoint in telemetry.endpoint_names() {
                if let Some(alert) = telemetry.evaluate(&endpoint) {
                    warn!(endpoint = %alert.endpoint, reason = %alert.reason, "telemetry alert");
                }
            }
        }
    });
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
