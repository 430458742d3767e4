// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(windows)]
// Safe functions here take `HANDLE` arguments. The aliased raw pointers are
// opaque tokens from win32 calls and are never dereferenced.
#![allow(clippy::not_unsafe_ptr_arg_deref)]

pub mod file;
pub mod handle;

use anyhow::Result;
use winapi::shared::minwindef::{BOOL, FALSE};

pub fn last_os_error() -> anyhow::Error {
    std::io::Error::last_os_error().into()
}

/// Run a win32 call that reports failure through a FALSE return, converting
/// failure into the thread's last OS error.
pub fn check_winapi<T: FnOnce() -> BOOL>(f: T) -> Result<()> {
    if f() == FALSE {
        Err(last_os_error())
    } else {
        Ok(())
    }
}
