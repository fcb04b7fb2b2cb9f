pub mod cancel;
pub mod host;
pub mod metrics;
pub mod retry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
