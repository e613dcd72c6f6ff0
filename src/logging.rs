//! Tracing subscriber set-up for binaries and host processes.
//!
//! `RUST_LOG` wins when it is set; otherwise the configured level applies to
//! this crate and to script output (`scriptdev::script`).

use tracing_subscriber::EnvFilter;

use crate::config::BridgeConfig;

/// Filter for `level`, unless `RUST_LOG` provides one.
pub fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("warn").add_directive(
            format!("scriptdev={}", level)
                .parse()
                .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
    })
}

/// Install a global fmt subscriber using the configured log level.
///
/// Returns `false` if a global subscriber was already installed, for example
/// by the host application.
pub fn init(config: &BridgeConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(&config.log_level))
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_for_level() {
        if std::env::var_os("RUST_LOG").is_none() {
            let filter = filter_for("debug").to_string();
            assert!(filter.contains("scriptdev=debug"), "{filter}");
        }
    }

    #[test]
    fn test_bad_level_falls_back() {
        if std::env::var_os("RUST_LOG").is_none() {
            let filter = filter_for("not a level").to_string();
            assert!(filter.contains("info"), "{filter}");
        }
    }
}
