pub mod batch;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod rate_guard;
pub mod sampling;
pub mod session;
pub mod transport;
pub mod waqi;

#[cfg(test)]
pub mod test_support;
