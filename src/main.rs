use access_agent::api::api_routes;
use access_agent::config::AgentConfig;
use access_agent::{build_coordinator, demo};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AgentConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    // Initialize tracing, optionally mirrored to a daily log file
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "access-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    config.warn_fallbacks();

    eprintln!("🔐 Access Agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Notifications: {:?}", config.notification);
    match &config.provisioning.tool_endpoint {
        Some(endpoint) => eprintln!("   Tools: {}", endpoint),
        None => eprintln!("   Tools: simulated"),
    }
    eprintln!(
        "   Tool timeout: {}s",
        config.provisioning.tool_timeout.as_secs()
    );
    eprintln!("   API: http://0.0.0.0:{}/api/requests", config.api_port);
    eprintln!("   Events WS: ws://0.0.0.0:{}/ws", config.api_port);
    if let Some(dir) = &config.log_dir {
        eprintln!("   Logs: {}", dir.display());
    }

    let coordinator = build_coordinator(&config)?;

    // ── Demo intake ─────────────────────────────────────────────────────
    if config.demo {
        let summary = coordinator.submit_batch(demo::sample_detections()).await;
        eprintln!(
            "   Demo: {} messages, {} requests, {} pending ({})\n",
            summary.messages_processed,
            summary.requests_found,
            summary.approvals_pending,
            summary.approval_ids.join(", ")
        );
    } else {
        eprintln!();
    }

    // ── API server ──────────────────────────────────────────────────────
    let app = api_routes(coordinator);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.api_port)).await?;
    tracing::info!(port = config.api_port, "Access agent API started");
    axum::serve(listener, app).await?;

    Ok(())
}
