use anyhow::Context;
use docsage::service::{DocumentService, PipelineApi};
use docsage::{api, config, logging, prompts::PromptRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = config::init_config().context("failed to load settings")?;
    logging::init_tracing(&settings, "docsage");

    let prompts = Arc::new(PromptRegistry::from_env().context("failed to load prompt catalog")?);
    let service = Arc::new(
        DocumentService::new(settings.clone(), prompts).context("failed to build service")?,
    );
    spawn_eviction(service.clone());
    let app = api::create_router(service);

    let (listener, port) = bind_listener(settings.server.port)
        .await
        .context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn spawn_eviction(service: Arc<DocumentService>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVICTION_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(error) = service.evict_idle_sessions().await {
                tracing::warn!(%error, "Session eviction failed");
            }
        }
    });
}

async fn bind_listener(fixed: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = fixed {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 5100..=5199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 5100-5199",
    ))
}
