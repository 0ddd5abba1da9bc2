//! Shared fixtures for the integration tests.

#![allow(dead_code)]

pub mod builders;
pub mod strategies;

pub use builders::*;
