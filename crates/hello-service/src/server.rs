//! Server lifecycle.
//!
//! The serve task and the signal task share one [`CancellationToken`]:
//! whichever finishes first cancels it, the server stops accepting, and
//! in-flight requests get [`GRACE_PERIOD`] to finish before the task is
//! aborted.

use axum::Router;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Time in-flight requests get after shutdown starts.
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Serves `router` on `listener` until `token` is cancelled, then drains for
/// at most `grace`.
///
/// A server error cancels `token` too, so the signal task ends with it.
pub async fn run(
    listener: TcpListener,
    router: Router,
    token: CancellationToken,
    grace: Duration,
) -> io::Result<()> {
    let service = router.into_make_service_with_connect_info::<SocketAddr>();
    let mut server = tokio::spawn({
        let token = token.clone();
        async move {
            axum::serve(listener, service)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        }
    });

    tokio::select! {
        result = &mut server => {
            token.cancel();
            return flatten(result);
        }
        () = token.cancelled() => {}
    }

    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => flatten(result),
        Err(_) => {
            tracing::warn!(grace_secs = grace.as_secs(), "Grace period elapsed; aborting in-flight requests");
            server.abort();
            Ok(())
        }
    }
}

fn flatten(result: Result<io::Result<()>, tokio::task::JoinError>) -> io::Result<()> {
    result.map_err(io::Error::other)?
}

/// Cancels `token` on SIGINT or SIGTERM. Returns early if the token is
/// cancelled elsewhere.
pub async fn shutdown_signal(token: CancellationToken) {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGINT");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    let signal = tokio::select! {
        signal = interrupt => signal,
        signal = terminate => signal,
        () = token.cancelled() => return,
    };

    tracing::info!(signal, "Shutdown signal received");
    token.cancel();
}
