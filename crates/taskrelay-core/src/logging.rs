//! Tracing subscriber setup for hosts embedding the core.

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_DIRECTIVE: &str = "info,taskrelay_core=debug";

/// Install a fmt subscriber filtered by `RUST_LOG`, or `default_directive`
/// when the variable is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with_target(false)
        .with_line_number(true)
        .try_init()
        .is_ok()
}
