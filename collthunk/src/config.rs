//! Runtime-configurable parameters for collective thunks.
//!
//! Override via environment variables (prefixed `COLLTHUNK_`) or by
//! constructing a custom `ThunkConfig`.

use std::time::Duration;

/// Default bound on a single collective exchange.
pub const DEFAULT_COLLECTIVE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Parameters shared by every collective thunk of a run.
#[derive(Debug, Clone)]
pub struct ThunkConfig {
    /// Timeout applied to every collective primitive call. Participants that
    /// do not all arrive within this bound fail with `CommunicationTimeout`.
    pub collective_timeout: Duration,
}

impl Default for ThunkConfig {
    fn default() -> Self {
        Self {
            collective_timeout: DEFAULT_COLLECTIVE_TIMEOUT,
        }
    }
}

impl ThunkConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `COLLTHUNK_COLLECTIVE_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let timeout = std::env::var("COLLTHUNK_COLLECTIVE_TIMEOUT_SECS").ok();
        Self::with_timeout_secs(timeout.as_deref())
    }

    /// Defaults with the timeout overridden by `secs`, if it parses.
    fn with_timeout_secs(secs: Option<&str>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = secs
            && let Ok(s) = v.trim().parse::<u64>()
        {
            cfg.collective_timeout = Duration::from_secs(s);
        }

        cfg
    }
}
