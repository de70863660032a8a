//! Shared utilities

pub mod error;
pub mod pem;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ViceError, ViceResult};
