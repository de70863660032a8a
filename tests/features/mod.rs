//! Cucumber features for the certificate lifecycle


pub use support::TestWorld;
