use std::future::Future;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Long-running daemon tasks. Each runs in its own tokio task, so a panic in
/// one is logged here and leaves the others running.
#[derive(Default)]
pub struct TaskSet {
    set: JoinSet<()>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let inner = tokio::spawn(task);
        self.set.spawn(async move {
            match inner.await {
                Ok(()) => info!("task '{name}' finished"),
                Err(err) if err.is_panic() => error!("task '{name}' panicked: {err}"),
                Err(err) => warn!("task '{name}' was cancelled: {err}"),
            }
        });
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub async fn join_all(mut self) {
        while self.set.join_next().await.is_some() {}
    }
}
