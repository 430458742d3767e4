// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Debug-events handler for collector runs: reports module selection and
//! classifies target exceptions for the loop's continuation policy.

use std::collections::HashSet;

use anyhow::Result;
use log::{debug, info, warn};

use coverage_filter::CoverageFilterManager;
use debugger::{DebugEventsHandler, ExceptionType};
use win_util::file::get_path_from_handle;
use winapi::um::minwinbase::{
    CREATE_PROCESS_DEBUG_INFO, EXCEPTION_BREAKPOINT, EXCEPTION_DEBUG_INFO,
    EXIT_PROCESS_DEBUG_INFO, LOAD_DLL_DEBUG_INFO,
};
use winapi::um::winnt::HANDLE;

// When debugging a WoW64 process the 32-bit initial breakpoint arrives as
// STATUS_WX86_BREAKPOINT rather than EXCEPTION_BREAKPOINT.
const WX86_BREAKPOINT: u32 = winapi::shared::ntstatus::STATUS_WX86_BREAKPOINT as u32;

/// Exception code of a C++ `throw` on the MSVC runtime.
const EXCEPTION_CPP: u32 = 0xE06D7363;

pub struct CollectorEventsHandler<'a> {
    filters: &'a mut CoverageFilterManager,

    /// Processes whose expected initial breakpoint was already seen.
    initial_break_seen: HashSet<usize>,
}

impl<'a> CollectorEventsHandler<'a> {
    pub fn new(filters: &'a mut CoverageFilterManager) -> Self {
        CollectorEventsHandler {
            filters,
            initial_break_seen: HashSet::new(),
        }
    }

    fn report_module(&mut self, file: HANDLE, what: &str) {
        match get_path_from_handle(file) {
            Ok(path) => {
                if self.filters.is_module_selected(&path) {
                    info!("{} selected: {}", what, path.display());
                } else {
                    debug!("{} skipped by module filters: {}", what, path.display());
                }
            }
            Err(err) => debug!("no path for {} handle: {:#}", what, err),
        }
    }
}

impl DebugEventsHandler for CollectorEventsHandler<'_> {
    fn on_create_process(&mut self, info: &CREATE_PROCESS_DEBUG_INFO) -> Result<()> {
        self.report_module(info.hFile, "process image");
        Ok(())
    }

    fn on_exit_process(
        &mut self,
        _process: HANDLE,
        _thread: HANDLE,
        info: &EXIT_PROCESS_DEBUG_INFO,
    ) -> Result<()> {
        info!("process exited with code {}", info.dwExitCode);
        Ok(())
    }

    fn on_load_dll(
        &mut self,
        _process: HANDLE,
        _thread: HANDLE,
        info: &LOAD_DLL_DEBUG_INFO,
    ) -> Result<()> {
        self.report_module(info.hFile, "module");
        Ok(())
    }

    fn on_exception(
        &mut self,
        process: HANDLE,
        _thread: HANDLE,
        info: &EXCEPTION_DEBUG_INFO,
    ) -> Result<ExceptionType> {
        let code = info.ExceptionRecord.ExceptionCode;

        let kind = match code {
            EXCEPTION_BREAKPOINT | WX86_BREAKPOINT => {
                // The first breakpoint in each process is the notification
                // the OS raises once the process is ready for the debugger.
                if self.initial_break_seen.insert(process as usize) {
                    ExceptionType::BreakPoint
                } else {
                    ExceptionType::InvalidBreakPoint
                }
            }
            EXCEPTION_CPP => ExceptionType::CppError,
            _ => ExceptionType::NotHandled,
        };

        if kind == ExceptionType::NotHandled && info.dwFirstChance == 0 {
            warn!("unhandled exception 0x{:08x} in the target", code);
        }

        Ok(kind)
    }
}
