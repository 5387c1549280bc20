//! Logging utilities and structured logging support

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    env_logger::init();
}

/// Initialize the logging system with a fallback filter
///
/// `RUST_LOG` still wins when it is set; `default_filter` is used otherwise
/// (for example the `log_filter` field of the engine configuration).
pub fn init_with_filter(default_filter: &str) {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    // A second init (tests, embedding) is not an error worth surfacing
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
