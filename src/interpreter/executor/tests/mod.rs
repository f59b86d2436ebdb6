//! Tests for the executor
//!
//! Organized by feature area

mod call_tests;
mod error_tests;
mod helpers;
