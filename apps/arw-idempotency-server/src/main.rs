use anyhow::Context;
use std::net::SocketAddr;
use tracing::{error, info};

mod access_log;
mod api;
mod bootstrap;
mod router;
mod telemetry;
#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let bootstrap::BootstrapOutput {
        http,
        idempotency,
        router,
    } = match bootstrap::build() {
        Ok(out) => out,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let listener = tokio::net::TcpListener::bind(http.addr)
        .await
        .with_context(|| format!("bind server socket {}", http.addr))?;
    info!(
        addr = %http.addr,
        concurrency_limit = http.concurrency_limit,
        "idempotency server listening"
    );

    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!("http server exited with error: {err}");
    }

    info!(
        cached = idempotency.len(),
        "shutting down; idempotency cache discarded"
    );
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}
