//! Runtime - supervised background tasks and signal handling

use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns a cancellation scope and the tasks spawned inside it.
///
/// `shutdown` cancels the scope and waits for every task to finish, so a
/// stopped scope never leaves a loop running behind its owner's back.
pub struct TaskScope {
    name: &'static str,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScope {
    pub fn new(name: &'static str) -> Self {
        Self::with_token(name, CancellationToken::new())
    }

    /// Scope that is also cancelled when `parent` is.
    pub fn child_of(name: &'static str, parent: &CancellationToken) -> Self {
        Self::with_token(name, parent.child_token())
    }

    fn with_token(name: &'static str, token: CancellationToken) -> Self {
        Self { name, token, tasks: Mutex::new(Vec::new()) }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a task that receives the scope's token.
    pub fn spawn<F, Fut>(&self, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.token.clone()));
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Cancel the scope and wait for its tasks.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(scope = self.name, "background task panicked: {}", e);
                }
            }
        }
        tracing::debug!(scope = self.name, "task scope stopped");
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Install signal handlers and return a token cancelled on SIGINT/SIGTERM
pub fn install_signal_handlers() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let handle = shutdown.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut sigterm, mut sigint) = match (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
            ) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    tracing::warn!("could not install signal handlers");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("could not install Ctrl+C handler");
                return;
            }
            tracing::info!("Received Ctrl+C");
        }

        handle.cancel();
    });

    shutdown
}
