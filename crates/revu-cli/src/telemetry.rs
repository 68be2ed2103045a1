//! Logging initialization.
//!
//! Filtered by `REVU_LOG` (an `EnvFilter` directive, default `warn`). Output
//! goes to stderr so command output on stdout stays pipeable.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "REVU_LOG";

/// Install the global subscriber. With `json`, events are written as JSON
/// lines.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    // A second call (tests, embedding) keeps the first subscriber.
    installed.ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_keeps_first_subscriber() {
        init(false);
        init(true);
        tracing::warn!("still logging after a repeated init");
        assert!(tracing::dispatcher::has_been_set());
    }
}
