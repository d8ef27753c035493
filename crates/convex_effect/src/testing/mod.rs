//! Helpers for testing functions without a live backend.

mod mock_host;

pub use self::mock_host::{
    MockHost,
    ScheduledCall,
};

pub fn config_test() {
    // Ok if it fails, logging is probably initialized already.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}
