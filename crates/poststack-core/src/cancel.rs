//! Ambient cancellation, constructed once at the CLI entrypoint and threaded down
//! through every crate that makes a blocking external call (database query, container
//! runtime subprocess, manifest apply/wait, readiness polling).

use crate::error::{PoststackError, PoststackResult};
use tokio_util::sync::CancellationToken;

/// A cheaply-clonable cancellation handle. Call [`Cancellation::check`] at each
/// suspension point named in the concurrency model (before starting a migration,
/// before applying a manifest, inside a readiness poll loop) to fail fast with
/// [`PoststackError::Cancelled`] rather than continuing to do external work after the
/// operator has asked to stop.
#[derive(Debug, Clone)]
pub struct Cancellation(CancellationToken);

impl Cancellation {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Return `Err(Cancelled)` if cancellation has been requested, otherwise `Ok(())`.
    /// Intended to be called at the top of a loop body or between sequential phases.
    pub fn check(&self) -> PoststackResult<()> {
        if self.0.is_cancelled() {
            Err(PoststackError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Await cancellation; used in `tokio::select!` against a sleep/poll future so a
    /// blocking wait loop (readiness polling, `wait_exit`) can be interrupted promptly
    /// instead of only noticing cancellation on its next iteration.
    pub async fn cancelled(&self) {
        self.0.cancelled().await
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncancelled_check_is_ok() {
        let cancel = Cancellation::new();
        assert!(cancel.check().is_ok());
    }

    #[test]
    fn cancelled_check_fails() {
        let cancel = Cancellation::new();
        cancel.cancel();
        assert!(matches!(cancel.check(), Err(PoststackError::Cancelled)));
    }

    #[test]
    fn clones_share_cancellation_state() {
        let cancel = Cancellation::new();
        let clone = cancel.clone();
        clone.cancel();
        assert!(cancel.is_cancelled());
    }
}
