//! lumen-server: HTTP face of the glasses assistant core.
//!
//! Serves the three server-push streams, the photo and settings endpoints,
//! and the dev surface. The wearable host integration drives the lifecycle
//! controller exposed through [`state::AppState`]; this binary owns process
//! startup, configuration, and shutdown.

mod config;
mod geocode;
mod routes;
mod sse;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;

use lumen_agent::{HttpAgentClient, HttpAgentConfig};
use lumen_core::{
    ChatArchive, EventBus, Geocoder, JsonlArchive, LifecycleController, SessionRegistry,
    UserConfig,
};

use crate::config::ServerConfig;
use crate::geocode::NominatimGeocoder;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "lumen-server", about = "Session core for the Lumen glasses assistant")]
struct Args {
    /// Port to listen on (overrides PORT).
    #[arg(short, long)]
    port: Option<u16>,

    /// Grace period in seconds before a disconnected user is torn down.
    #[arg(long, default_value_t = 60)]
    grace_secs: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lumen=info,lumen_server=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    let port = args.port.unwrap_or(config.port);

    let bus = Arc::new(EventBus::new());

    let mut agent_config =
        HttpAgentConfig::new(config.agent_endpoint.clone(), config.agent_api_key.clone());
    if let Some(ref model) = config.agent_model {
        agent_config = agent_config.with_model(model.clone());
    }
    let agent = Arc::new(HttpAgentClient::new(agent_config));

    let geocoder: Arc<dyn Geocoder> = Arc::new(NominatimGeocoder::new());
    let archive: Option<Arc<dyn ChatArchive>> = config
        .archive_dir
        .as_ref()
        .map(|dir| Arc::new(JsonlArchive::new(dir)) as Arc<dyn ChatArchive>);
    if archive.is_none() {
        tracing::info!("No archive directory configured; chat history is in-memory only");
    }

    let user_config = UserConfig {
        processing_sound: config.processing_sound_url.clone(),
        ..UserConfig::default()
    };
    let registry = SessionRegistry::new(bus, agent, Some(geocoder), archive, user_config);
    let lifecycle = Arc::new(
        LifecycleController::new(Arc::clone(&registry), config.welcome_sound_url.clone())
            .with_grace(Duration::from_secs(args.grace_secs)),
    );
    let state = AppState::new(registry, lifecycle);

    let app = Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/chat/stream", get(sse::chat_stream))
        .route("/api/transcription-stream", get(sse::transcription_stream))
        .route("/api/photo-stream", get(sse::photo_stream))
        .route("/api/speak", post(routes::speak))
        .route("/api/stop-audio", post(routes::stop_audio))
        .route(
            "/api/theme-preference",
            get(routes::get_theme).post(routes::set_theme),
        )
        .route(
            "/api/settings",
            get(routes::get_settings).patch(routes::patch_settings),
        )
        .route("/api/latest-photo", get(routes::latest_photo))
        .route("/api/photo/:request_id", get(routes::photo_by_id))
        .route("/api/photo-base64/:request_id", get(routes::photo_base64))
        .route("/api/debug/kill-session", post(routes::kill_session))
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("lumen-server listening on {addr}");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutting down");
}
