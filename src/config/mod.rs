use std::env;
use std::time::Duration;

/// Tunables for the session protocol, loaded from the environment.
pub struct Config {
    pub sync: SyncConfig,
    pub session: SessionConfig,
}

pub struct SyncConfig {
    /// How long rapid broadcast requests are coalesced before one state
    /// envelope goes out.
    pub debounce_window: Duration,
}

pub struct SessionConfig {
    /// Countdown tick resolution for timed interactions.
    pub countdown_tick: Duration,
    /// Delay between relaying a farewell and dropping peer channels, so
    /// in-flight messages leave the wire first.
    pub teardown_grace: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            sync: SyncConfig {
                debounce_window: Duration::from_millis(parse_ms("DEBOUNCE_MS", 300)),
            },
            session: SessionConfig {
                countdown_tick: Duration::from_millis(parse_ms("COUNTDOWN_TICK_MS", 1000)),
                teardown_grace: Duration::from_millis(parse_ms("TEARDOWN_GRACE_MS", 400)),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync: SyncConfig {
                debounce_window: Duration::from_millis(300),
            },
            session: SessionConfig {
                countdown_tick: Duration::from_millis(1000),
                teardown_grace: Duration::from_millis(400),
            },
        }
    }
}

fn parse_ms(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, "Unable to parse duration, using default");
            default
        }),
        Err(_) => default,
    }
}
