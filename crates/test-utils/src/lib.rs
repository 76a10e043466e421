// crates/test-utils/src/lib.rs

//! Shared fixtures for the integration tests: task builders over an
//! in-memory store, a scriptable remote resource, and tracing setup.

pub mod builders;
pub mod fake_remote;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Per-test deadline for anything that awaits a worker or a monitor.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-captured subscriber once per test binary.
///
/// The filter comes from `TASKGATE_LOG` (same syntax as `RUST_LOG`) and
/// defaults to `info`. Output only shows for failing tests unless the
/// harness runs with `--nocapture`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(taskgate::logging::LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, failing the test if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .expect("test timed out")
}
