//! Integration test binary: every scenario links into one executable.
//!
//! See the matklad pattern: <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod helpers;

mod assets_flow;
mod install_flow;
mod launch_flow;
mod registry_contract;
