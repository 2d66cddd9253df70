//! Tracing initialisation for hosts embedding the assessment core.
//!
//! The default filter keeps dependencies at `warn` and opens the
//! `posture_core` and `posture_store` targets at the requested level, so
//! run events are visible without HTTP or runtime chatter from the host.
//! `POSTURE_LOG` overrides it, then `RUST_LOG`.
//!
//! Later calls to [`init_tracing`] are ignored; the global subscriber can
//! only be set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Targets opened at the requested level.
pub const CRATE_TARGETS: [&str; 2] = ["posture_core", "posture_store"];

/// Filter directives used when no override is set.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(CRATE_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Pick the filter directives from `POSTURE_LOG`, then `RUST_LOG`, then the
/// defaults. An override that does not parse is skipped.
pub fn resolve_directives(var: impl Fn(&str) -> Option<String>, level: Level) -> String {
    ["POSTURE_LOG", "RUST_LOG"]
        .into_iter()
        .filter_map(|name| var(name))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty() && EnvFilter::try_new(v).is_ok())
        .unwrap_or_else(|| default_directives(level))
}

/// Initialise the global tracing subscriber.
///
/// With `json`, each line carries the enclosing run span so events from one
/// assessment can be grouped by `run_id`.
pub fn init_tracing(json: bool, level: Level) {
    let directives = resolve_directives(|name| std::env::var(name).ok(), level);
    let env_filter = EnvFilter::try_new(&directives)
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_open_only_crate_targets() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,posture_core=debug,posture_store=debug"
        );
    }

    #[test]
    fn posture_log_wins_over_rust_log() {
        let resolved = resolve_directives(
            vars(&[("POSTURE_LOG", "posture_core=trace"), ("RUST_LOG", "info")]),
            Level::INFO,
        );
        assert_eq!(resolved, "posture_core=trace");

        let resolved = resolve_directives(vars(&[("RUST_LOG", "info")]), Level::INFO);
        assert_eq!(resolved, "info");
    }

    #[test]
    fn unparsable_override_falls_back() {
        let resolved = resolve_directives(
            vars(&[("POSTURE_LOG", "posture_core=loud"), ("RUST_LOG", "  ")]),
            Level::WARN,
        );
        assert_eq!(resolved, default_directives(Level::WARN));
    }

    #[test]
    fn init_twice_is_harmless() {
        init_tracing(false, Level::DEBUG);
        init_tracing(true, Level::INFO);
        tracing::info!(event = "telemetry.test", "subscriber installed");
    }
}
