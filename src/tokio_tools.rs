use std::future::Future;

use tokio::task::JoinHandle;

use crate::error::{ProtocolError, Result};

const LOG_TARGET: &str = "unlynx::tokio_tools";

/// Spawn a node task with a stable name when supported, and trace span otherwise.
pub fn spawn_named_task<F, S>(name: S, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
    S: Into<String>,
{
    let name_owned = name.into();
    #[cfg(tokio_unstable)]
    {
        tokio::task::Builder::new()
            .name(&name_owned)
            .spawn(future)
            .expect("spawning inside a running runtime")
    }
    #[cfg(not(tokio_unstable))]
    {
        use tracing::Instrument;
        let span = tracing::info_span!("node_task", task_name = %name_owned);
        tokio::spawn(future.instrument(span))
    }
}

/// Runs CPU-bound protocol work on the blocking pool. A panicking step
/// surfaces as a closed channel, the same as a vanished peer.
pub async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(target: LOG_TARGET, error = %err, "blocking step did not complete");
            Err(ProtocolError::ChannelClosed)
        }
    }
}
