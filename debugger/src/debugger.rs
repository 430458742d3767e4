// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Debug-event pump for coverage runs.
//!
//! The pump owns the target process tree: it spawns the root process with a
//! debug creation flag, blocks on `WaitForDebugEvent`, keeps the process and
//! thread handle tables, applies the exception continuation policy, and
//! latches the root process exit code, which becomes the result of the run.

use std::{
    collections::hash_map::{Entry, HashMap},
    io,
    mem::MaybeUninit,
    os::windows::process::CommandExt,
    path::PathBuf,
    process::Command,
};

use log::{debug, error, info, trace, warn};
use thiserror::Error;
use win_util::handle::Handle;
use winapi::{
    shared::minwindef::{DWORD, FALSE},
    um::{
        debugapi::{ContinueDebugEvent, WaitForDebugEvent},
        minwinbase::{
            CREATE_PROCESS_DEBUG_INFO, EXCEPTION_BREAKPOINT, EXCEPTION_DEBUG_INFO,
            EXIT_PROCESS_DEBUG_INFO, LOAD_DLL_DEBUG_INFO, UNLOAD_DLL_DEBUG_INFO,
        },
        winbase::{DEBUG_ONLY_THIS_PROCESS, DEBUG_PROCESS, INFINITE},
        winnt::{DBG_CONTINUE, DBG_EXCEPTION_NOT_HANDLED, HANDLE},
    },
};

use crate::debug_event::{DebugEvent, DebugEventInfo};
use crate::dump;

/// How the events handler classified an exception event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExceptionType {
    /// A breakpoint installed by the coverage instrumentation.
    BreakPoint,
    /// A breakpoint nobody installed, typically an assertion failure or an
    /// explicit DebugBreak() in the target.
    InvalidBreakPoint,
    /// The handler chose not to interpret the exception.
    NotHandled,
    /// Same continuation policy as `NotHandled`; kept separate so handlers
    /// can report it differently.
    Error,
    /// A C++ exception thrown by the target.
    CppError,
}

/// Callbacks the debug loop drives while pumping events.
///
/// Handles passed to the callbacks stay valid for the duration of the call.
/// An error returned from any callback aborts the loop.
pub trait DebugEventsHandler {
    fn on_create_process(&mut self, _info: &CREATE_PROCESS_DEBUG_INFO) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoked before the process is removed from the handle table;
    /// `info.dwExitCode` is the authoritative exit code of the process.
    fn on_exit_process(
        &mut self,
        _process: HANDLE,
        _thread: HANDLE,
        _info: &EXIT_PROCESS_DEBUG_INFO,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// The file handle in `info` is closed as soon as this returns; it must
    /// not be stored.
    fn on_load_dll(
        &mut self,
        _process: HANDLE,
        _thread: HANDLE,
        _info: &LOAD_DLL_DEBUG_INFO,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_unload_dll(
        &mut self,
        _process: HANDLE,
        _thread: HANDLE,
        _info: &UNLOAD_DLL_DEBUG_INFO,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_exception(
        &mut self,
        _process: HANDLE,
        _thread: HANDLE,
        _info: &EXCEPTION_DEBUG_INFO,
    ) -> anyhow::Result<ExceptionType> {
        Ok(ExceptionType::NotHandled)
    }
}

#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("failed to spawn target process")]
    Spawn(#[source] io::Error),

    #[error("WaitForDebugEvent failed")]
    WaitForDebugEvent(#[source] io::Error),

    #[error("ContinueDebugEvent failed")]
    ContinueDebugEvent(#[source] io::Error),

    #[error("process {0} created twice")]
    DuplicateProcess(DWORD),

    #[error("thread {0} created twice")]
    DuplicateThread(DWORD),

    #[error("no such process {0}")]
    UnknownProcess(DWORD),

    #[error("no such thread {0}")]
    UnknownThread(DWORD),

    #[error("debug events handler failed")]
    Handler(#[source] anyhow::Error),
}

/// Options fixed for the lifetime of a debug run.
pub struct DebuggerOptions {
    /// Debug the whole process tree, not only the root process.
    pub cover_children: bool,

    /// On a C++ exception, consume it and keep running instead of letting
    /// the target unwind.
    pub continue_after_cpp_exception: bool,

    /// Pass invalid breakpoints through so an assertion terminates the
    /// target normally.
    pub stop_on_assert: bool,

    /// Write a minidump for crashing exceptions.
    pub dump_on_crash: bool,

    /// Directory minidumps are written to.
    pub dump_directory: PathBuf,
}

impl Default for DebuggerOptions {
    fn default() -> Self {
        DebuggerOptions {
            cover_children: false,
            continue_after_cpp_exception: false,
            stop_on_assert: false,
            dump_on_crash: false,
            dump_directory: ".".into(),
        }
    }
}

/// Continuation decision produced by one dispatched event.
///
/// `exit_code` is only meaningful for the root process and is latched at
/// most once. An empty `continue_status` means "continue and consume".
#[derive(Default)]
struct ProcessStatus {
    exit_code: Option<i32>,
    continue_status: Option<DWORD>,
}

impl ProcessStatus {
    fn new(exit_code: Option<i32>, continue_status: Option<DWORD>) -> Self {
        ProcessStatus {
            exit_code,
            continue_status,
        }
    }
}

pub struct Debugger {
    options: DebuggerOptions,
    process_handles: HashMap<DWORD, HANDLE>,
    thread_handles: HashMap<DWORD, HANDLE>,
    root_process_id: Option<DWORD>,
    exit_code: Option<i32>,
}

impl Debugger {
    pub fn new(options: DebuggerOptions) -> Self {
        Debugger {
            options,
            process_handles: HashMap::new(),
            thread_handles: HashMap::new(),
            root_process_id: None,
            exit_code: None,
        }
    }

    /// Run `command` under the debugger until the root process and every
    /// debugged descendant have exited. Returns the root's exit code.
    ///
    /// The loop must keep pumping past the root's exit while descendants
    /// are alive; their events would be orphaned otherwise. Conversely the
    /// root exit code latched here is never overwritten by later exits.
    pub fn debug(
        &mut self,
        mut command: Command,
        handler: &mut impl DebugEventsHandler,
    ) -> Result<i32, DebuggerError> {
        let creation_flags = if self.options.cover_children {
            DEBUG_PROCESS
        } else {
            DEBUG_ONLY_THIS_PROCESS
        };

        let _child = command
            .creation_flags(creation_flags)
            .spawn()
            .map_err(DebuggerError::Spawn)?;

        self.process_handles.clear();
        self.thread_handles.clear();
        self.root_process_id = None;
        self.exit_code = None;

        let exit_code = loop {
            let mut de = MaybeUninit::uninit();
            if unsafe { WaitForDebugEvent(de.as_mut_ptr(), INFINITE) } == FALSE {
                return Err(DebuggerError::WaitForDebugEvent(io::Error::last_os_error()));
            }

            let de = unsafe { de.assume_init() };
            let event = DebugEvent::new(&de);
            trace!("debug event: {}", event);

            let continue_status = self.dispatch_event(&event, handler)?;

            if unsafe {
                ContinueDebugEvent(event.process_id(), event.thread_id(), continue_status)
            } == FALSE
            {
                return Err(DebuggerError::ContinueDebugEvent(io::Error::last_os_error()));
            }

            if let Some(code) = self.exit_code {
                if self.process_handles.is_empty() {
                    break code;
                }
            }
        };

        Ok(exit_code)
    }

    pub fn running_processes(&self) -> usize {
        self.process_handles.len()
    }

    pub fn running_threads(&self) -> usize {
        self.thread_handles.len()
    }

    fn dispatch_event(
        &mut self,
        event: &DebugEvent<'_>,
        handler: &mut impl DebugEventsHandler,
    ) -> Result<DWORD, DebuggerError> {
        let status = self.handle_debug_event(event, handler)?;

        // Latch the exit code of the root process only, and only once: a
        // swallowed breakpoint late in the run must not overwrite it.
        if let Some(code) = status.exit_code {
            if self.root_process_id == Some(event.process_id()) && self.exit_code.is_none() {
                self.exit_code = Some(code);
            }
        }

        Ok(status.continue_status.unwrap_or(DBG_CONTINUE))
    }

    fn handle_debug_event(
        &mut self,
        event: &DebugEvent<'_>,
        handler: &mut impl DebugEventsHandler,
    ) -> Result<ProcessStatus, DebuggerError> {
        match event.info() {
            DebugEventInfo::CreateProcess(info) => {
                self.on_create_process(event, info, handler)?;
                Ok(ProcessStatus::default())
            }
            DebugEventInfo::CreateThread(info) => {
                self.register_thread(event.thread_id(), info.hThread)?;
                Ok(ProcessStatus::default())
            }
            _ => {
                let process = self.process_handle(event.process_id())?;
                let thread = self.thread_handle(event.thread_id())?;
                self.handle_not_creational_event(event, handler, process, thread)
            }
        }
    }

    fn on_create_process(
        &mut self,
        event: &DebugEvent<'_>,
        info: &CREATE_PROCESS_DEBUG_INFO,
        handler: &mut impl DebugEventsHandler,
    ) -> Result<(), DebuggerError> {
        // Closed on every path out of this scope.
        let _image_file = Handle(info.hFile);

        let process_id = event.process_id();
        debug!("create process: {}", process_id);

        if self.root_process_id.is_none() && self.process_handles.is_empty() {
            self.root_process_id = Some(process_id);
        }

        match self.process_handles.entry(process_id) {
            Entry::Occupied(_) => return Err(DebuggerError::DuplicateProcess(process_id)),
            Entry::Vacant(entry) => {
                entry.insert(info.hProcess);
            }
        }

        handler
            .on_create_process(info)
            .map_err(DebuggerError::Handler)?;

        // The payload also announces the initial thread of the new process.
        self.register_thread(event.thread_id(), info.hThread)
    }

    fn handle_not_creational_event(
        &mut self,
        event: &DebugEvent<'_>,
        handler: &mut impl DebugEventsHandler,
        process: HANDLE,
        thread: HANDLE,
    ) -> Result<ProcessStatus, DebuggerError> {
        match event.info() {
            DebugEventInfo::ExitProcess(info) => {
                // The exiting thread gets no EXIT_THREAD event of its own.
                self.remove_thread(event.thread_id())?;

                debug!("exit process: {}", event.process_id());
                handler
                    .on_exit_process(process, thread, info)
                    .map_err(DebuggerError::Handler)?;

                if self.process_handles.remove(&event.process_id()).is_none() {
                    return Err(DebuggerError::UnknownProcess(event.process_id()));
                }

                Ok(ProcessStatus::new(Some(info.dwExitCode as i32), None))
            }
            DebugEventInfo::ExitThread(_) => {
                self.remove_thread(event.thread_id())?;
                Ok(ProcessStatus::default())
            }
            DebugEventInfo::LoadDll(info) => {
                // Closed on every path out of this scope.
                let _dll_file = Handle(info.hFile);

                handler
                    .on_load_dll(process, thread, info)
                    .map_err(DebuggerError::Handler)?;
                Ok(ProcessStatus::default())
            }
            DebugEventInfo::UnloadDll(info) => {
                handler
                    .on_unload_dll(process, thread, info)
                    .map_err(DebuggerError::Handler)?;
                Ok(ProcessStatus::default())
            }
            DebugEventInfo::Exception(info) => {
                self.on_exception(event, info, handler, process, thread)
            }
            DebugEventInfo::Rip(info) => {
                error!(
                    "debuggee terminated unexpectedly: type={} {}",
                    info.dwType,
                    io::Error::from_raw_os_error(info.dwError as i32)
                );
                Ok(ProcessStatus::default())
            }
            _ => {
                debug!("ignored debug event: {}", event);
                Ok(ProcessStatus::default())
            }
        }
    }

    fn on_exception(
        &self,
        event: &DebugEvent<'_>,
        info: &EXCEPTION_DEBUG_INFO,
        handler: &mut impl DebugEventsHandler,
        process: HANDLE,
        thread: HANDLE,
    ) -> Result<ProcessStatus, DebuggerError> {
        let exception_type = handler
            .on_exception(process, thread, info)
            .map_err(DebuggerError::Handler)?;

        match exception_type {
            ExceptionType::BreakPoint => Ok(ProcessStatus::new(None, Some(DBG_CONTINUE))),
            ExceptionType::InvalidBreakPoint => {
                warn!(
                    "assertion failure or explicit DebugBreak() in process {}",
                    event.process_id()
                );

                // The target rarely handles these itself, so dump even on
                // the first chance.
                self.write_crash_dump(event, info, process, thread, true);

                if self.options.stop_on_assert {
                    warn!("stop on assertion");
                    Ok(ProcessStatus::new(None, Some(DBG_EXCEPTION_NOT_HANDLED)))
                } else {
                    // The transient exit code only sticks if this turns out
                    // to be the root's last observed status.
                    Ok(ProcessStatus::new(
                        Some(EXCEPTION_BREAKPOINT as i32),
                        Some(DBG_CONTINUE),
                    ))
                }
            }
            ExceptionType::NotHandled | ExceptionType::Error => {
                self.write_crash_dump(event, info, process, thread, false);
                Ok(ProcessStatus::new(None, Some(DBG_EXCEPTION_NOT_HANDLED)))
            }
            ExceptionType::CppError => {
                self.write_crash_dump(event, info, process, thread, false);

                if self.options.continue_after_cpp_exception {
                    warn!("continuing after a C++ exception");
                    Ok(ProcessStatus::new(
                        Some(info.ExceptionRecord.ExceptionCode as i32),
                        Some(DBG_CONTINUE),
                    ))
                } else {
                    Ok(ProcessStatus::new(None, Some(DBG_EXCEPTION_NOT_HANDLED)))
                }
            }
        }
    }

    fn write_crash_dump(
        &self,
        event: &DebugEvent<'_>,
        info: &EXCEPTION_DEBUG_INFO,
        process: HANDLE,
        thread: HANDLE,
        include_first_chance: bool,
    ) {
        if !self.options.dump_on_crash {
            return;
        }

        // A first-chance exception may still be caught by the target.
        if info.dwFirstChance != 0 && !include_first_chance {
            return;
        }

        match dump::write_minidump(
            &self.options.dump_directory,
            event.process_id(),
            event.thread_id(),
            process,
            thread,
            info,
        ) {
            Ok(path) => info!("created minidump {}", path.display()),
            Err(err) => warn!("failed to create minidump: {:#}", err),
        }
    }

    fn register_thread(&mut self, thread_id: DWORD, handle: HANDLE) -> Result<(), DebuggerError> {
        debug!("create thread: {}", thread_id);

        match self.thread_handles.entry(thread_id) {
            Entry::Occupied(_) => Err(DebuggerError::DuplicateThread(thread_id)),
            Entry::Vacant(entry) => {
                entry.insert(handle);
                Ok(())
            }
        }
    }

    fn remove_thread(&mut self, thread_id: DWORD) -> Result<(), DebuggerError> {
        debug!("exit thread: {}", thread_id);

        if self.thread_handles.remove(&thread_id).is_none() {
            return Err(DebuggerError::UnknownThread(thread_id));
        }

        Ok(())
    }

    fn process_handle(&self, process_id: DWORD) -> Result<HANDLE, DebuggerError> {
        self.process_handles
            .get(&process_id)
            .copied()
            .ok_or(DebuggerError::UnknownProcess(process_id))
    }

    fn thread_handle(&self, thread_id: DWORD) -> Result<HANDLE, DebuggerError> {
        self.thread_handles
            .get(&thread_id)
            .copied()
            .ok_or(DebuggerError::UnknownThread(thread_id))
    }
}

#[cfg(test)]
mod tests;
