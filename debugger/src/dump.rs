// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Minidump capture for crashing debuggees.

use std::{
    fs::File,
    mem,
    os::windows::io::AsRawHandle,
    path::{Path, PathBuf},
    ptr,
};

use anyhow::{Context, Result};
use chrono::Local;
use win_util::check_winapi;
use winapi::{
    shared::minwindef::{DWORD, FALSE},
    um::{
        minidumpapiset::{MiniDumpNormal, MiniDumpWriteDump, MINIDUMP_EXCEPTION_INFORMATION},
        minwinbase::EXCEPTION_DEBUG_INFO,
        processthreadsapi::GetThreadContext,
        winnt::{CONTEXT, CONTEXT_ALL, EXCEPTION_POINTERS, HANDLE},
    },
};

/// Write a minidump for `exception`, named
/// `crash-<pid>-YYYY-MM-DD-HH-MM-SS.dmp` from the local wall clock, into
/// `dump_directory`. Returns the path of the written file.
pub(crate) fn write_minidump(
    dump_directory: &Path,
    process_id: DWORD,
    thread_id: DWORD,
    process: HANDLE,
    thread: HANDLE,
    exception: &EXCEPTION_DEBUG_INFO,
) -> Result<PathBuf> {
    let mut context: CONTEXT = unsafe { mem::zeroed() };
    context.ContextFlags = CONTEXT_ALL;
    check_winapi(|| unsafe { GetThreadContext(thread, &mut context) })
        .context("GetThreadContext")?;

    let mut exception_record = exception.ExceptionRecord;
    let mut exception_pointers = EXCEPTION_POINTERS {
        ExceptionRecord: &mut exception_record,
        ContextRecord: &mut context,
    };
    let mut dump_info = MINIDUMP_EXCEPTION_INFORMATION {
        ThreadId: thread_id,
        ExceptionPointers: &mut exception_pointers,
        ClientPointers: FALSE,
    };

    let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
    let path = dump_directory.join(format!("crash-{}-{}.dmp", process_id, timestamp));
    let file =
        File::create(&path).with_context(|| format!("creating {}", path.display()))?;

    check_winapi(|| unsafe {
        MiniDumpWriteDump(
            process,
            process_id,
            file.as_raw_handle() as HANDLE,
            MiniDumpNormal,
            &mut dump_info,
            ptr::null_mut(),
            ptr::null_mut(),
        )
    })
    .context("MiniDumpWriteDump")?;

    Ok(path)
}
