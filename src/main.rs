use anyhow::Context;
use page_agent::api::{self, ApiContext};
use page_agent::{config, AgentSessions, CdpPage, EventEmitter};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("page_agent=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}. Using in-memory defaults.", e);
            config::AgentConfig::default()
        }
    };

    let page = CdpPage::attach(
        config.browser.cdp_port,
        config.browser.target_url_prefix.as_deref(),
    )
    .await
    .with_context(|| format!("attaching to DevTools on port {}", config.browser.cdp_port))?;

    let sessions = AgentSessions::new(config.clone(), EventEmitter::new());
    let agent = sessions
        .get_or_install(Arc::new(page))
        .await
        .context("installing the agent")?;

    let server = if config.api.enabled && config.api.port > 0 {
        let state = Arc::new(ApiContext { agent });
        let port = config.api.port;
        let api_key = config.api.api_key.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::run_server(state, port, api_key).await {
                tracing::error!("API server error: {}", e);
            }
        }))
    } else {
        tracing::info!("API disabled; agent installed without a transport");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("Shutting down");

    if let Some(server) = server {
        server.abort();
    }
    sessions.shutdown_all().await;
    Ok(())
}
