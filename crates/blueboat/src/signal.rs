//! Process signals that stop the server.

use crate::ShutdownTrigger;

/// Resolves when the process is asked to stop: `SIGINT`, `SIGTERM` or
/// `SIGUSR2` on unix, Ctrl-C elsewhere.
///
/// A signal whose handler can't be installed is logged and ignored; the
/// others still work.
pub async fn shutdown_signal() -> ShutdownTrigger {
    #[cfg(unix)]
    {
        use tokio::signal::unix::SignalKind;

        let name = tokio::select! {
            name = wait_for(SignalKind::interrupt(), "SIGINT") => name,
            name = wait_for(SignalKind::terminate(), "SIGTERM") => name,
            name = wait_for(SignalKind::user_defined2(), "SIGUSR2") => name,
        };
        ShutdownTrigger::Signal(name)
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        ShutdownTrigger::Signal("Ctrl-C")
    }
}

#[cfg(unix)]
async fn wait_for(kind: tokio::signal::unix::SignalKind, name: &'static str) -> &'static str {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
            tracing::info!(signal = name, "received shutdown signal");
            name
        }
        Err(e) => {
            tracing::error!(signal = name, error = %e, "failed to install signal handler");
            std::future::pending().await
        }
    }
}
