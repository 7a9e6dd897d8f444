use crate::docker::DockerRuntime;
use crate::reconciler::Reconciler;
use crate::state::AppState;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod callback;
mod config;
mod docker;
mod image_reference;
mod notification;
mod reconciler;
mod runtime;
mod secret_string;
mod state;
mod webserver;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("Starting hub-autorestart {}", env!("CARGO_PKG_VERSION"));

    let config = config::load()?;

    let runtime = DockerRuntime::connect(&config).await?;
    let reconciler = Reconciler::new(Arc::new(runtime));

    let callback_client = match config.feature_flags.enable_registry_callback {
        true => Some(callback::CallbackClient::new(
            config.callback.allowed_hosts.clone(),
        )?),
        false => None,
    };

    let app = webserver::create_app(AppState {
        reconciler: Arc::new(reconciler),
        callback_client,
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal, finishing in-flight webhooks");
}
