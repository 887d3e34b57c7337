use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cooperative two-phase shutdown for long-running subsystems.
///
/// The first SIGTERM/SIGINT cancels the returned token: the worker stops
/// claiming submissions and lets the in-flight benchmark reach its terminal
/// transition, and the web server drains open connections. Benchmark runs
/// can take a long time, so a second signal skips the drain and exits
/// immediately; the abandoned job is redelivered or reaped as stale.
pub fn install_shutdown_handler(subsystem: &'static str) -> CancellationToken {
    let token = CancellationToken::new();
    let drain = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        let received = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(
            signal = received,
            subsystem,
            "draining; signal again to exit immediately"
        );
        drain.cancel();

        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
        tracing::warn!(subsystem, "second signal, exiting without draining");
        std::process::exit(130);
    });

    token
}
