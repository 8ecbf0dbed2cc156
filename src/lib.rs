pub mod chain;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod identity;
pub mod logging;
pub mod registry;
pub mod transport;
pub mod upstream;

#[cfg(test)]
pub(crate) mod test_support;
