//! Subscriber setup for binaries and ad-hoc tools.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "kgqa_signatures=info";

/// Install a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Calling it twice is harmless: the second call leaves the first
/// subscriber in place and returns `false`.
pub fn init() -> bool {
    init_with(DEFAULT_FILTER)
}

pub fn init_with(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let _ = init();
        assert!(!init());
    }
}
