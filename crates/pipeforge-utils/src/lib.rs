pub mod atomic_write;
pub mod clock;
pub mod error;
pub mod logging;
pub mod paths;
pub mod redaction;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
