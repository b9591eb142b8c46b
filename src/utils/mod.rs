//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `gqlsub` application.
//!
//! It centralizes the error types shared by every layer and the tracing
//! setup used by the binary and the tests.

pub mod error;
pub mod logging;
