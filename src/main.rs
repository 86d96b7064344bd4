use callrelay::application::{AudioBridge, AudioBridgeConfig, CallOrchestrator};
use callrelay::config::Config;
use callrelay::infrastructure::event_bus::IngressEventBus;
use callrelay::infrastructure::http::ReqwestHttpCore;
use callrelay::infrastructure::protocols::webrtc::WebRtcMediaSessionFactory;
use callrelay::interface::api::{build_router, init_metrics, AppState};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting callrelay");

    // Load configuration
    let config_path = std::env::args().nth(1);
    let config = Config::load(Some(config_path.as_deref().unwrap_or("callrelay")))?;
    info!(
        "Configuration loaded (server {}:{}, event prefix {})",
        config.server.host, config.server.port, config.calling.event_prefix
    );

    let prometheus_handle = init_metrics()?;

    let http = Arc::new(ReqwestHttpCore::new(
        config.calling.access_token.clone(),
        config.calling.tracking_id_prefix.clone(),
    )?);
    let media_factory = Arc::new(WebRtcMediaSessionFactory::new(config.media.ice_servers.clone()));

    let orchestrator = CallOrchestrator::new(
        config.calling.clone(),
        config.discovery.clone(),
        http,
        media_factory,
    );

    let servers = orchestrator.discover().await;
    info!("Using {} candidate servers", servers.len());

    match orchestrator.create_line().await {
        Ok(line) => info!("Line {} registered", line.id()),
        Err(e) => warn!("Line registration failed, continuing without a line: {}", e),
    }

    let bridge = AudioBridge::new(AudioBridgeConfig::from_config(&config.media)).await?;
    orchestrator.set_audio_bridge(Some(Arc::clone(&bridge)));

    // Backend notifications arrive through POST /events
    let events = Arc::new(IngressEventBus::new());
    orchestrator.attach_event_bus(events.clone()).await?;

    let app = build_router(
        AppState {
            orchestrator: Arc::clone(&orchestrator),
            events,
        },
        prometheus_handle,
    );
    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await?;
    info!(
        "Control API listening on {}:{}",
        config.server.host, config.server.port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await?;

    info!("Shutting down...");
    orchestrator.shutdown().await;
    if let Err(e) = bridge.close().await {
        warn!("Audio bridge close failed: {}", e);
    }

    Ok(())
}
