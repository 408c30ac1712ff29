pub mod battery;
pub mod btle;
pub mod central;
pub mod client;
pub mod constants;
#[cfg(test)]
pub(crate) mod fake;
pub mod payload;
pub mod poll;
pub mod session;
pub mod transport;
pub mod types;
