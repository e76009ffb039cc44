//! Cooperative cancellation shared by the stream consumer and the finalizer.

use tokio::sync::watch;

/// Resolve once the cancellation flag is raised.
///
/// A dropped sender never resolves: losing the handle is not a cancel.
pub async fn wait_for_cancellation(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow_and_update() {
            return;
        }
        if cancel_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn is_cancelled(cancel_rx: &watch::Receiver<bool>) -> bool {
    *cancel_rx.borrow()
}
