use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

/// Per-session cancellation handle. Clones share state, so the front end can
/// hold one while the agent runs a turn with another.
///
/// Each turn gets a fresh `CancellationToken`; `cancel` trips whichever token
/// is current. The token is both the flag the loop polls at its checkpoints
/// and the one-shot signal that in-flight awaits race against.
#[derive(Debug, Clone, Default)]
pub struct Canceller {
    current: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    token: CancellationToken,
    armed: bool,
}

impl Canceller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.lock().token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().token.is_cancelled()
    }

    /// Installs the token for a turn that is about to start, so a cancel
    /// issued before the turn begins still applies to it.
    pub fn arm(&self) {
        let mut state = self.lock();
        state.token = CancellationToken::new();
        state.armed = true;
    }

    /// Returns the token for the turn now starting. An armed token is kept
    /// as is, tripped or not; otherwise a fresh one is installed.
    pub(crate) fn reset(&self) -> CancellationToken {
        let mut state = self.lock();
        if !std::mem::take(&mut state.armed) {
            state.token = CancellationToken::new();
        }
        state.token.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_trips_the_current_token() {
        let canceller = Canceller::new();
        let token = canceller.reset();
        let remote = canceller.clone();

        assert!(!token.is_cancelled());
        remote.cancel();
        assert!(token.is_cancelled());
        assert!(canceller.is_cancelled());
    }

    #[test]
    fn reset_clears_a_previous_cancellation() {
        let canceller = Canceller::new();
        let old = canceller.reset();
        canceller.cancel();

        let fresh = canceller.reset();
        assert!(old.is_cancelled());
        assert!(!fresh.is_cancelled());
        assert!(!canceller.is_cancelled());
    }

    #[test]
    fn cancel_after_arming_survives_the_turn_start() {
        let canceller = Canceller::new();
        canceller.arm();
        canceller.cancel();

        let token = canceller.reset();
        assert!(token.is_cancelled());

        // Arming is consumed by one turn start.
        assert!(!canceller.reset().is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_once_signalled() {
        let canceller = Canceller::new();
        let token = canceller.reset();
        let remote = canceller.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remote.cancel();
        });

        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("cancellation should resolve");
    }
}
