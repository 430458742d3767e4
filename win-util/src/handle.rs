// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use winapi::um::{handleapi::CloseHandle, winnt::HANDLE};

/// Owns a win32 `HANDLE` and closes it on drop.
///
/// Debug events embed file handles that the debugger must close on every
/// path out of the event scope, including early returns from a failing
/// callback. Wrapping them here makes the release unconditional.
pub struct Handle(pub HANDLE);

impl Drop for Handle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

unsafe impl Send for Handle {}
