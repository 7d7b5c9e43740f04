pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod platform;
pub mod shutdown;
pub mod workflow;
pub mod workspace;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
