//! Assertion helpers for VFS integration tests.

use sftpmount_vfs::{FsError, FsResult};
use std::fmt::Debug;

/// Asserts that `result` failed with `errno`.
#[track_caller]
pub fn assert_errno<T: Debug>(result: FsResult<T>, errno: i32) {
    match result {
        Ok(value) => panic!("expected errno {errno}, got Ok({value:?})"),
        Err(e) => assert_eq!(
            e.to_errno(),
            errno,
            "expected errno {errno}, got {e:?} (errno {})",
            e.to_errno()
        ),
    }
}

/// Asserts a "no such entry" failure, local or remote.
#[track_caller]
pub fn assert_not_found<T: Debug>(result: FsResult<T>) {
    match result {
        Ok(value) => panic!("expected not found, got Ok({value:?})"),
        Err(e) => assert!(
            matches!(e, FsError::NotFound(_)) || e.is_not_found(),
            "expected not found, got {e:?}"
        ),
    }
}
