//! Tracing subscriber setup for the CLI.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Pick the filter: an explicit `--log-level` wins, then `RUST_LOG`, then `info`.
pub fn env_filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Install the global fmt subscriber. Later calls are ignored.
pub fn init(level: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_wins() {
        assert_eq!(env_filter(Some("debug")).to_string(), "debug");
        assert_eq!(env_filter(Some("cloudshare_collector=trace")).to_string(), "cloudshare_collector=trace");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(Some("warn"));
        init(Some("warn"));
    }
}
