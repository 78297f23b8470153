//! Cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared stop request.
///
/// Checked before every sleep and before every remote call. A call already
/// in flight is never interrupted; it finishes or times out.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Installs a Ctrl-C handler that sets this flag.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler is already installed.
    pub fn install_ctrlc_handler(&self) -> crate::Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("Received interrupt, stopping after the current record");
            flag.cancel();
        })
        .map_err(|e| crate::Error::OperationFailed {
            operation: "install_ctrlc_handler".to_string(),
            cause: e.to_string(),
        })
    }
}
