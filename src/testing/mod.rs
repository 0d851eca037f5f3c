//! Testing utilities and mock implementations
//!
//! Mocks for driving trigger loops and observing triggers without a message
//! broker.

pub mod mocks;

pub use mocks::*;
