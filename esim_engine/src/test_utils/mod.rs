//! Helpers for tests in this crate and in the server crate. Enabled with the `test_utils` feature.
pub mod mocks;
pub mod prepare_env;
pub mod seed;
