//! Common test utilities for VFS integration tests.

#![allow(dead_code)]

pub mod assertions;
pub mod harness;

// Not every test binary uses every helper.
#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use harness::{RecordingNotifier, TestMount, test_config};
