use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One-shot session deadline.
///
/// When the timeout elapses the watcher cancels its token and fires its
/// signal exactly once. Stopping it first cancels the token without firing.
#[derive(Debug)]
pub struct DeadlineWatcher {
    token: CancellationToken,
    signal: Option<oneshot::Receiver<()>>,
}

impl DeadlineWatcher {
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn start(timeout: Duration) -> Self {
        let token = CancellationToken::new();
        let (fired, signal) = oneshot::channel();

        let watched = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => {
                    debug!("Session deadline of {timeout:?} elapsed");
                    watched.cancel();
                    let _ = fired.send(());
                }
                () = watched.cancelled() => {}
            }
        });

        Self {
            token,
            signal: Some(signal),
        }
    }

    /// Token cancelled on expiry or stop.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The expiry signal. Available once; resolves with `Err` if the watcher
    /// was stopped before the deadline.
    pub const fn take_signal(&mut self) -> Option<oneshot::Receiver<()>> {
        self.signal.take()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_on_expiry() {
        let mut watcher = DeadlineWatcher::start(Duration::from_secs(600));
        let signal = watcher.take_signal();
        assert!(watcher.take_signal().is_none());

        let fired = match signal {
            Some(signal) => signal.await,
            None => panic!("signal should be available once"),
        };

        assert!(fired.is_ok());
        assert!(watcher.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_without_firing() {
        let mut watcher = DeadlineWatcher::start(Duration::from_secs(600));
        let signal = watcher.take_signal();
        watcher.stop();
        watcher.stop();

        let fired = match signal {
            Some(signal) => signal.await,
            None => panic!("signal should be available once"),
        };

        assert!(fired.is_err());
        assert!(watcher.is_cancelled());
    }
}
