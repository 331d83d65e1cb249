//! Shared helpers for `rollout` tests: config builders, fake process runner
//! and artifact builder, tracing setup.

pub mod builders;
pub mod fakes;

pub use fakes::{FakeBuilder, FakeProcessRunner, SharedBuffer};

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

/// Upper bound for any single async test step.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Route `tracing` output through the test harness capture.
///
/// Reads the same `ROLLOUT_LOG` directives as the binary, falling back to
/// `RUST_LOG`, then `info`. Output shows up only for failing tests unless
/// run with `--nocapture`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(rollout::logging::LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"));

        // Another test binary helper may have installed one already.
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, panicking if it outlives [`TEST_TIMEOUT`].
///
/// Builds that hang on a missed cancellation show up as a failure here
/// instead of a stuck test run.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("test step did not finish within {TEST_TIMEOUT:?}"),
    }
}
