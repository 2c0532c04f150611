use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TimedTaskError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Wakeup strategy ───────────────────────────────────────────

/// How the background loop decides when to wake up next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WakeupStrategy {
    /// Wake on a fixed repeating interval and drain everything due.
    Polling {
        #[serde(default = "default_poll_interval_ms")]
        interval_ms: u64,
    },
    /// Keep one single-shot timer aimed at the earliest due task.
    Adaptive,
}

impl WakeupStrategy {
    pub fn polling(interval: Duration) -> Self {
        WakeupStrategy::Polling {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Polling interval, `None` for the adaptive strategy.
    pub fn poll_interval(&self) -> Option<Duration> {
        match self {
            WakeupStrategy::Polling { interval_ms } => Some(Duration::from_millis(*interval_ms)),
            WakeupStrategy::Adaptive => None,
        }
    }

    pub fn is_adaptive(&self) -> bool {
        matches!(self, WakeupStrategy::Adaptive)
    }
}

impl Default for WakeupStrategy {
    fn default() -> Self {
        WakeupStrategy::Adaptive
    }
}

impl fmt::Display for WakeupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WakeupStrategy::Polling { interval_ms } => write!(f, "polling({}ms)", interval_ms),
            WakeupStrategy::Adaptive => f.write_str("adaptive"),
        }
    }
}

impl FromStr for WakeupStrategy {
    type Err = TimedTaskError;

    /// Accepts `adaptive`, `polling` (default interval) or `polling:<ms>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.split_once(':') {
            None if s == "adaptive" => Ok(WakeupStrategy::Adaptive),
            None if s == "polling" => Ok(WakeupStrategy::Polling {
                interval_ms: default_poll_interval_ms(),
            }),
            Some(("polling", ms)) => ms
                .parse()
                .map(|interval_ms| WakeupStrategy::Polling { interval_ms })
                .map_err(|_| TimedTaskError::Config(format!("invalid polling interval: {ms}"))),
            _ => Err(TimedTaskError::Config(format!("unknown wakeup strategy: {s}"))),
        }
    }
}

// ── Scheduler config ──────────────────────────────────────────

/// Scheduler configuration, parsed from TOML or the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Queue name used in log lines and snapshots.
    #[serde(default = "default_name")]
    pub name: String,
    /// Wakeup strategy of the background loop.
    #[serde(default)]
    pub strategy: WakeupStrategy,
    /// Pops later than this past their due key emit a "delayed pop" warning.
    #[serde(default = "default_pop_delay_ms")]
    pub pop_delay_ms: u64,
    /// Housekeeping tick that rolls the dispatch rate counter.
    #[serde(default = "default_lap_interval_ms")]
    pub lap_interval_ms: u64,
}

fn default_name() -> String {
    "TaskQueue".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_pop_delay_ms() -> u64 {
    1000
}

fn default_lap_interval_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            strategy: WakeupStrategy::default(),
            pop_delay_ms: default_pop_delay_ms(),
            lap_interval_ms: default_lap_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn new(name: impl Into<String>, strategy: WakeupStrategy) -> Self {
        Self {
            name: name.into(),
            strategy,
            ..Self::default()
        }
    }

    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TIMEDTASK_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TIMEDTASK_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();

        let strategy = match profiled_env_opt(p, "TIMEDTASK_STRATEGY") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring TIMEDTASK_STRATEGY");
                WakeupStrategy::default()
            }),
            None => WakeupStrategy::default(),
        };
        let strategy = match (strategy, profiled_env_opt(p, "TIMEDTASK_POLL_INTERVAL_MS")) {
            (WakeupStrategy::Polling { interval_ms }, Some(raw)) => WakeupStrategy::Polling {
                interval_ms: raw.parse().unwrap_or(interval_ms),
            },
            (s, _) => s,
        };

        Self {
            name: profiled_env_or(p, "TIMEDTASK_NAME", &default_name()),
            strategy,
            pop_delay_ms: profiled_env_u64(p, "TIMEDTASK_POP_DELAY_MS", default_pop_delay_ms()),
            lap_interval_ms: profiled_env_u64(
                p,
                "TIMEDTASK_LAP_INTERVAL_MS",
                default_lap_interval_ms(),
            ),
        }
    }

    /// Load config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TimedTaskError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse config from a TOML string and validate it.
    pub fn from_toml(content: &str) -> Result<Self, TimedTaskError> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TimedTaskError> {
        if let WakeupStrategy::Polling { interval_ms: 0 } = self.strategy {
            return Err(TimedTaskError::Config(
                "polling interval must be greater than zero".to_string(),
            ));
        }
        if self.lap_interval_ms == 0 {
            return Err(TimedTaskError::Config(
                "lap interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pop_delay(&self) -> Duration {
        Duration::from_millis(self.pop_delay_ms)
    }

    pub fn lap_interval(&self) -> Duration {
        Duration::from_millis(self.lap_interval_ms)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Scheduler config loaded:");
        tracing::info!("  name:        {}", self.name);
        tracing::info!("  strategy:    {}", self.strategy);
        tracing::info!("  pop_delay:   {}ms", self.pop_delay_ms);
        tracing::info!("  lap:         {}ms", self.lap_interval_ms);
    }
}
