use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is received.
/// Polls, the instruction dispatcher and the state API all watch this token, and a
/// secondary still issues its final reset under a fresh scope after it fires.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token_clone = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, cancelling coordination");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, cancelling coordination");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}
