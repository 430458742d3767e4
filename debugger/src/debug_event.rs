// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Safe tagged view over the win32 `DEBUG_EVENT` union.

use std::fmt;
use std::path::Path;

use win_util::file::get_path_from_handle;
use winapi::{
    shared::minwindef::DWORD,
    um::minwinbase::{
        CREATE_PROCESS_DEBUG_EVENT, CREATE_PROCESS_DEBUG_INFO, CREATE_THREAD_DEBUG_EVENT,
        CREATE_THREAD_DEBUG_INFO, DEBUG_EVENT, EXCEPTION_DEBUG_EVENT, EXCEPTION_DEBUG_INFO,
        EXIT_PROCESS_DEBUG_EVENT, EXIT_PROCESS_DEBUG_INFO, EXIT_THREAD_DEBUG_EVENT,
        EXIT_THREAD_DEBUG_INFO, LOAD_DLL_DEBUG_EVENT, LOAD_DLL_DEBUG_INFO,
        OUTPUT_DEBUG_STRING_EVENT, RIP_EVENT, RIP_INFO, UNLOAD_DLL_DEBUG_EVENT,
        UNLOAD_DLL_DEBUG_INFO,
    },
};

pub enum DebugEventInfo<'a> {
    CreateProcess(&'a CREATE_PROCESS_DEBUG_INFO),
    CreateThread(&'a CREATE_THREAD_DEBUG_INFO),
    ExitProcess(&'a EXIT_PROCESS_DEBUG_INFO),
    ExitThread(&'a EXIT_THREAD_DEBUG_INFO),
    LoadDll(&'a LOAD_DLL_DEBUG_INFO),
    UnloadDll(&'a UNLOAD_DLL_DEBUG_INFO),
    Exception(&'a EXCEPTION_DEBUG_INFO),
    Rip(&'a RIP_INFO),
    OutputDebugString,
    Unknown(DWORD),
}

impl fmt::Display for DebugEventInfo<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        use DebugEventInfo::*;
        match self {
            CreateProcess(info) => {
                let image = get_path_from_handle(info.hFile).unwrap_or_else(|_| "???".into());
                write!(
                    formatter,
                    "create_process image={} base=0x{:016x}",
                    Path::new(&image).display(),
                    info.lpBaseOfImage as u64,
                )
            }
            CreateThread(_) => write!(formatter, "create_thread"),
            ExitProcess(info) => {
                write!(formatter, "exit_process exit_code={}", info.dwExitCode)
            }
            ExitThread(info) => write!(formatter, "exit_thread exit_code={}", info.dwExitCode),
            LoadDll(info) => {
                let image = get_path_from_handle(info.hFile).unwrap_or_else(|_| "???".into());
                write!(
                    formatter,
                    "load_dll image={} base=0x{:016x}",
                    Path::new(&image).display(),
                    info.lpBaseOfDll as u64,
                )
            }
            UnloadDll(info) => {
                write!(formatter, "unload_dll base=0x{:016x}", info.lpBaseOfDll as u64)
            }
            Exception(info) => write!(
                formatter,
                "exception code=0x{:08x} address=0x{:016x} first_chance={}",
                info.ExceptionRecord.ExceptionCode,
                info.ExceptionRecord.ExceptionAddress as u64,
                info.dwFirstChance != 0,
            ),
            Rip(info) => write!(
                formatter,
                "rip error=0x{:x} type={}",
                info.dwError, info.dwType
            ),
            OutputDebugString => write!(formatter, "output_debug_string"),
            Unknown(code) => write!(formatter, "unknown event code {}", code),
        }
    }
}

pub struct DebugEvent<'a> {
    process_id: DWORD,
    thread_id: DWORD,
    info: DebugEventInfo<'a>,
}

impl<'a> DebugEvent<'a> {
    pub fn new(de: &'a DEBUG_EVENT) -> Self {
        let info = unsafe {
            match de.dwDebugEventCode {
                CREATE_PROCESS_DEBUG_EVENT => {
                    DebugEventInfo::CreateProcess(de.u.CreateProcessInfo())
                }
                CREATE_THREAD_DEBUG_EVENT => DebugEventInfo::CreateThread(de.u.CreateThread()),
                EXIT_PROCESS_DEBUG_EVENT => DebugEventInfo::ExitProcess(de.u.ExitProcess()),
                EXIT_THREAD_DEBUG_EVENT => DebugEventInfo::ExitThread(de.u.ExitThread()),
                LOAD_DLL_DEBUG_EVENT => DebugEventInfo::LoadDll(de.u.LoadDll()),
                UNLOAD_DLL_DEBUG_EVENT => DebugEventInfo::UnloadDll(de.u.UnloadDll()),
                EXCEPTION_DEBUG_EVENT => DebugEventInfo::Exception(de.u.Exception()),
                RIP_EVENT => DebugEventInfo::Rip(de.u.RipInfo()),
                OUTPUT_DEBUG_STRING_EVENT => DebugEventInfo::OutputDebugString,
                code => DebugEventInfo::Unknown(code),
            }
        };

        Self {
            process_id: de.dwProcessId,
            thread_id: de.dwThreadId,
            info,
        }
    }

    pub fn process_id(&self) -> DWORD {
        self.process_id
    }

    pub fn thread_id(&self) -> DWORD {
        self.thread_id
    }

    pub fn info(&self) -> &DebugEventInfo<'a> {
        &self.info
    }
}

impl fmt::Display for DebugEvent<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            "pid={} tid={} {}",
            self.process_id, self.thread_id, self.info
        )
    }
}
