mod server;
mod tasks;

pub use server::run_server;
pub use tasks::TaskSet;

use tokio::sync::watch;

/// Resolves once shutdown has been requested. A dropped sender never
/// resolves it.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
