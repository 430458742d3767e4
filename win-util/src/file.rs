// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{ffi::OsString, os::windows::ffi::OsStringExt, path::PathBuf};

use anyhow::Result;
use winapi::{
    shared::minwindef::{DWORD, MAX_PATH},
    um::{fileapi::GetFinalPathNameByHandleW, winnt::HANDLE},
};

use crate::last_os_error;

/// Recover the normalized path behind an open file handle.
pub fn get_path_from_handle(handle: HANDLE) -> Result<PathBuf> {
    let mut buf: Vec<u16> = Vec::with_capacity(MAX_PATH);

    loop {
        let len = unsafe {
            GetFinalPathNameByHandleW(
                handle,
                buf.as_mut_ptr(),
                buf.capacity() as DWORD,
                0, // normalized path with drive letter
            ) as usize
        };

        if len == 0 {
            return Err(last_os_error());
        }

        if len <= buf.capacity() {
            unsafe {
                buf.set_len(len);
            }
            break;
        }

        // The buffer was too small; `len` is the required size.
        buf.reserve(len);
    }

    Ok(PathBuf::from(OsString::from_wide(&buf)))
}
