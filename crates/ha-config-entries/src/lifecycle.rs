//! Config entry lifecycle
//!
//! Valid state transitions for a [`ConfigEntry`](crate::ConfigEntry):
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress (manual retry)
//!                            ↘ SetupRetry → SetupInProgress (scheduled retry)
//!
//! Loaded/SetupError/SetupRetry → UnloadInProgress → NotLoaded
//!                                                 ↘ FailedUnload (terminal)
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::entry::ConfigEntryState;

/// Rejected lifecycle move
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot move config entry from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// Validate a move to `to`, returning the new state.
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let allowed = match self {
            NotLoaded => to == SetupInProgress,
            SetupInProgress => matches!(to, Loaded | SetupError | SetupRetry),
            SetupError | SetupRetry => matches!(to, SetupInProgress | UnloadInProgress),
            Loaded => to == UnloadInProgress,
            UnloadInProgress => matches!(to, NotLoaded | FailedUnload),
            FailedUnload => false,
        };
        if allowed {
            return Ok(to);
        }

        let reason = match (self, to) {
            (FailedUnload, _) => "failed unload is final",
            (NotLoaded, Loaded) => "setup has not run",
            (Loaded, NotLoaded) => "entry must be unloaded first",
            (Loaded, SetupInProgress) => "entry is already set up",
            (UnloadInProgress, Loaded) => "entry is being unloaded",
            _ => "not a lifecycle step",
        };
        Err(InvalidTransition {
            from: self,
            to,
            reason,
        })
    }

    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }
}

/// Delay before the next setup attempt of an entry in `SetupRetry`.
///
/// `2^min(tries, 4) * 5` seconds plus up to 100ms of jitter: 5s, 10s, 20s,
/// 40s, then 80s for every later attempt.
pub fn calculate_retry_delay(tries: u32) -> Duration {
    let base_secs = 2_u64.pow(tries.min(4)) * 5;
    let jitter = rand::random::<f64>() * 0.1;
    Duration::from_secs(base_secs) + Duration::from_secs_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConfigEntryState::*;

    #[test]
    fn test_setup_path() {
        assert!(NotLoaded.can_transition_to(SetupInProgress));
        assert!(SetupInProgress.can_transition_to(Loaded));
        assert!(SetupInProgress.can_transition_to(SetupRetry));
        assert!(SetupRetry.can_transition_to(SetupInProgress));
    }

    #[test]
    fn test_unload_path() {
        assert!(Loaded.can_transition_to(UnloadInProgress));
        assert!(UnloadInProgress.can_transition_to(NotLoaded));
        assert!(SetupRetry.can_transition_to(UnloadInProgress));
    }

    #[test]
    fn test_shortcuts_rejected() {
        let err = NotLoaded.try_transition(Loaded).unwrap_err();
        assert_eq!(err.from, NotLoaded);
        assert_eq!(err.to, Loaded);
        assert_eq!(err.reason, "setup has not run");

        assert!(!Loaded.can_transition_to(SetupInProgress));
        assert!(!Loaded.can_transition_to(NotLoaded));
    }

    #[test]
    fn test_failed_unload_is_terminal() {
        for to in [NotLoaded, SetupInProgress, Loaded, UnloadInProgress] {
            assert!(!FailedUnload.can_transition_to(to));
        }
    }

    #[test]
    fn test_retry_delay_backoff() {
        let first = calculate_retry_delay(0);
        assert!(first >= Duration::from_secs(5) && first < Duration::from_millis(5_100));

        let capped = calculate_retry_delay(10);
        assert!(capped >= Duration::from_secs(80) && capped < Duration::from_millis(80_100));
    }
}
