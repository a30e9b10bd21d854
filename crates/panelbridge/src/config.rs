//! Bridge configuration.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

const ENV_CALL_TIMEOUT_MS: &str = "PANELBRIDGE_CALL_TIMEOUT_MS";
const ENV_INBOUND_CAPACITY: &str = "PANELBRIDGE_INBOUND_CAPACITY";
const ENV_STATE_PATH: &str = "PANELBRIDGE_STATE_PATH";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long a call waits for its response. `None` trusts the remote side
    /// to always answer: an unanswered call then waits until the channel closes.
    pub call_timeout: Option<Duration>,
    /// Bound on queued inbound messages per endpoint.
    pub inbound_capacity: usize,
    /// Backing file for fallback / host-side state.
    pub state_path: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout: None,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            state_path: None,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `PANELBRIDGE_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = positive(&lookup, ENV_CALL_TIMEOUT_MS) {
            config.call_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(n) = positive(&lookup, ENV_INBOUND_CAPACITY) {
            config.inbound_capacity = usize::try_from(n).unwrap_or(usize::MAX);
        }
        if let Some(path) = lookup(ENV_STATE_PATH).filter(|p| !p.is_empty()) {
            config.state_path = Some(PathBuf::from(path));
        }

        config
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    let raw = lookup(name)?;
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring invalid value, expected a positive integer");
            None
        }
        Ok(n) => Some(n),
    }
}
