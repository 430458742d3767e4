use std::mem;
use std::ptr;

use winapi::shared::minwindef::DWORD;
use winapi::um::minwinbase::{
    CREATE_PROCESS_DEBUG_EVENT, CREATE_PROCESS_DEBUG_INFO, CREATE_THREAD_DEBUG_EVENT,
    DEBUG_EVENT, EXCEPTION_BREAKPOINT, EXCEPTION_DEBUG_EVENT, EXCEPTION_DEBUG_INFO,
    EXIT_PROCESS_DEBUG_EVENT, EXIT_PROCESS_DEBUG_INFO, EXIT_THREAD_DEBUG_EVENT,
    LOAD_DLL_DEBUG_EVENT,
};
use winapi::um::winnt::{DBG_CONTINUE, DBG_EXCEPTION_NOT_HANDLED, HANDLE};

use super::*;

const ROOT_PID: DWORD = 100;
const ROOT_TID: DWORD = 11;
const CHILD_PID: DWORD = 200;
const CHILD_TID: DWORD = 21;

const CPP_EXCEPTION: DWORD = 0xE06D7363;

#[derive(Default)]
struct ScriptedHandler {
    calls: Vec<&'static str>,
    exception_type: Option<ExceptionType>,
    fail_on_load_dll: bool,
}

impl ScriptedHandler {
    fn classifying(exception_type: ExceptionType) -> Self {
        ScriptedHandler {
            exception_type: Some(exception_type),
            ..ScriptedHandler::default()
        }
    }
}

impl DebugEventsHandler for ScriptedHandler {
    fn on_create_process(&mut self, _info: &CREATE_PROCESS_DEBUG_INFO) -> anyhow::Result<()> {
        self.calls.push("create_process");
        Ok(())
    }

    fn on_exit_process(
        &mut self,
        _process: HANDLE,
        _thread: HANDLE,
        _info: &EXIT_PROCESS_DEBUG_INFO,
    ) -> anyhow::Result<()> {
        self.calls.push("exit_process");
        Ok(())
    }

    fn on_load_dll(
        &mut self,
        _process: HANDLE,
        _thread: HANDLE,
        _info: &winapi::um::minwinbase::LOAD_DLL_DEBUG_INFO,
    ) -> anyhow::Result<()> {
        self.calls.push("load_dll");
        if self.fail_on_load_dll {
            anyhow::bail!("scripted failure");
        }
        Ok(())
    }

    fn on_exception(
        &mut self,
        _process: HANDLE,
        _thread: HANDLE,
        _info: &EXCEPTION_DEBUG_INFO,
    ) -> anyhow::Result<ExceptionType> {
        self.calls.push("exception");
        Ok(self.exception_type.expect("no scripted exception type"))
    }
}

fn fake_handle(value: usize) -> HANDLE {
    value as HANDLE
}

fn event(code: DWORD, pid: DWORD, tid: DWORD) -> DEBUG_EVENT {
    let mut de: DEBUG_EVENT = unsafe { mem::zeroed() };
    de.dwDebugEventCode = code;
    de.dwProcessId = pid;
    de.dwThreadId = tid;
    de
}

fn create_process_event(pid: DWORD, tid: DWORD) -> DEBUG_EVENT {
    let mut de = event(CREATE_PROCESS_DEBUG_EVENT, pid, tid);
    unsafe {
        let info = de.u.CreateProcessInfo_mut();
        info.hFile = ptr::null_mut();
        info.hProcess = fake_handle(0x1000 + pid as usize);
        info.hThread = fake_handle(0x2000 + tid as usize);
    }
    de
}

fn create_thread_event(pid: DWORD, tid: DWORD) -> DEBUG_EVENT {
    let mut de = event(CREATE_THREAD_DEBUG_EVENT, pid, tid);
    unsafe {
        de.u.CreateThread_mut().hThread = fake_handle(0x2000 + tid as usize);
    }
    de
}

fn exit_thread_event(pid: DWORD, tid: DWORD) -> DEBUG_EVENT {
    event(EXIT_THREAD_DEBUG_EVENT, pid, tid)
}

fn exit_process_event(pid: DWORD, tid: DWORD, exit_code: DWORD) -> DEBUG_EVENT {
    let mut de = event(EXIT_PROCESS_DEBUG_EVENT, pid, tid);
    unsafe {
        de.u.ExitProcess_mut().dwExitCode = exit_code;
    }
    de
}

fn load_dll_event(pid: DWORD, tid: DWORD) -> DEBUG_EVENT {
    let mut de = event(LOAD_DLL_DEBUG_EVENT, pid, tid);
    unsafe {
        de.u.LoadDll_mut().hFile = ptr::null_mut();
    }
    de
}

fn exception_event(pid: DWORD, tid: DWORD, code: DWORD, first_chance: DWORD) -> DEBUG_EVENT {
    let mut de = event(EXCEPTION_DEBUG_EVENT, pid, tid);
    unsafe {
        let info = de.u.Exception_mut();
        info.dwFirstChance = first_chance;
        info.ExceptionRecord.ExceptionCode = code;
    }
    de
}

fn dispatch(
    debugger: &mut Debugger,
    handler: &mut ScriptedHandler,
    de: &DEBUG_EVENT,
) -> Result<DWORD, DebuggerError> {
    let event = DebugEvent::new(de);
    debugger.dispatch_event(&event, handler)
}

fn dispatch_ok(debugger: &mut Debugger, handler: &mut ScriptedHandler, de: &DEBUG_EVENT) -> DWORD {
    dispatch(debugger, handler, de).expect("event dispatch failed")
}

#[test]
fn root_exit_code_latched_before_descendants() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::default();

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    dispatch_ok(&mut debugger, &mut handler, &create_process_event(CHILD_PID, CHILD_TID));
    dispatch_ok(&mut debugger, &mut handler, &exit_process_event(ROOT_PID, ROOT_TID, 7));

    // The root has exited but the child is alive, so the loop keeps going.
    assert_eq!(debugger.exit_code, Some(7));
    assert_eq!(debugger.running_processes(), 1);

    dispatch_ok(&mut debugger, &mut handler, &exit_process_event(CHILD_PID, CHILD_TID, 9));

    assert_eq!(debugger.exit_code, Some(7));
    assert_eq!(debugger.running_processes(), 0);
    assert_eq!(debugger.running_threads(), 0);
}

#[test]
fn root_exit_code_latched_after_descendants() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::default();

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    dispatch_ok(&mut debugger, &mut handler, &create_process_event(CHILD_PID, CHILD_TID));
    dispatch_ok(&mut debugger, &mut handler, &exit_process_event(CHILD_PID, CHILD_TID, 9));

    // A descendant exit never latches.
    assert_eq!(debugger.exit_code, None);
    assert_eq!(debugger.running_processes(), 1);

    dispatch_ok(&mut debugger, &mut handler, &exit_process_event(ROOT_PID, ROOT_TID, 7));

    assert_eq!(debugger.exit_code, Some(7));
    assert_eq!(debugger.running_processes(), 0);
}

#[test]
fn root_process_id_never_reassigned() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::default();

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    dispatch_ok(&mut debugger, &mut handler, &create_process_event(CHILD_PID, CHILD_TID));
    dispatch_ok(&mut debugger, &mut handler, &exit_process_event(ROOT_PID, ROOT_TID, 5));

    // A process created after the root exited does not become the root,
    // even though the root is gone from the table.
    dispatch_ok(&mut debugger, &mut handler, &create_process_event(300, 31));
    assert_eq!(debugger.root_process_id, Some(ROOT_PID));

    dispatch_ok(&mut debugger, &mut handler, &exit_process_event(300, 31, 9));
    dispatch_ok(&mut debugger, &mut handler, &exit_process_event(CHILD_PID, CHILD_TID, 8));
    assert_eq!(debugger.exit_code, Some(5));
}

#[test]
fn initial_thread_registered_with_its_process() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::default();

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    assert_eq!(debugger.running_threads(), 1);

    dispatch_ok(&mut debugger, &mut handler, &create_thread_event(ROOT_PID, 12));
    assert_eq!(debugger.running_threads(), 2);

    dispatch_ok(&mut debugger, &mut handler, &exit_thread_event(ROOT_PID, 12));
    assert_eq!(debugger.running_threads(), 1);

    // The exiting initial thread is removed with its process.
    dispatch_ok(&mut debugger, &mut handler, &exit_process_event(ROOT_PID, ROOT_TID, 0));
    assert_eq!(debugger.running_threads(), 0);
}

#[test]
fn duplicate_process_id_rejected() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::default();

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    let err = dispatch(&mut debugger, &mut handler, &create_process_event(ROOT_PID, 12));

    assert!(matches!(err, Err(DebuggerError::DuplicateProcess(pid)) if pid == ROOT_PID));
}

#[test]
fn duplicate_thread_id_rejected() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::default();

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    let err = dispatch(&mut debugger, &mut handler, &create_thread_event(ROOT_PID, ROOT_TID));

    assert!(matches!(err, Err(DebuggerError::DuplicateThread(tid)) if tid == ROOT_TID));
}

#[test]
fn event_for_unknown_process_rejected() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::default();

    let err = dispatch(&mut debugger, &mut handler, &load_dll_event(ROOT_PID, ROOT_TID));

    assert!(matches!(err, Err(DebuggerError::UnknownProcess(pid)) if pid == ROOT_PID));
    assert!(handler.calls.is_empty());
}

#[test]
fn event_for_unknown_thread_rejected() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::default();

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    let err = dispatch(&mut debugger, &mut handler, &exit_thread_event(ROOT_PID, 99));

    assert!(matches!(err, Err(DebuggerError::UnknownThread(tid)) if tid == 99));
}

#[test]
fn handler_error_aborts_dispatch() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler {
        fail_on_load_dll: true,
        ..ScriptedHandler::default()
    };

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    let err = dispatch(&mut debugger, &mut handler, &load_dll_event(ROOT_PID, ROOT_TID));

    assert!(matches!(err, Err(DebuggerError::Handler(_))));
}

#[test]
fn instrumentation_breakpoint_consumed() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::classifying(ExceptionType::BreakPoint);

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    let status = dispatch_ok(
        &mut debugger,
        &mut handler,
        &exception_event(ROOT_PID, ROOT_TID, EXCEPTION_BREAKPOINT, 1),
    );

    assert_eq!(status, DBG_CONTINUE);
    assert_eq!(debugger.exit_code, None);
}

#[test]
fn invalid_breakpoint_swallowed_by_default() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::classifying(ExceptionType::InvalidBreakPoint);

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    let status = dispatch_ok(
        &mut debugger,
        &mut handler,
        &exception_event(ROOT_PID, ROOT_TID, EXCEPTION_BREAKPOINT, 1),
    );

    // Swallowed, and the breakpoint code becomes the transient exit code.
    assert_eq!(status, DBG_CONTINUE);
    assert_eq!(debugger.exit_code, Some(EXCEPTION_BREAKPOINT as i32));

    // The real exit can no longer change the latched code.
    dispatch_ok(&mut debugger, &mut handler, &exit_process_event(ROOT_PID, ROOT_TID, 0));
    assert_eq!(debugger.exit_code, Some(EXCEPTION_BREAKPOINT as i32));
}

#[test]
fn invalid_breakpoint_passed_through_on_stop_on_assert() {
    let options = DebuggerOptions {
        stop_on_assert: true,
        ..DebuggerOptions::default()
    };
    let mut debugger = Debugger::new(options);
    let mut handler = ScriptedHandler::classifying(ExceptionType::InvalidBreakPoint);

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    let status = dispatch_ok(
        &mut debugger,
        &mut handler,
        &exception_event(ROOT_PID, ROOT_TID, EXCEPTION_BREAKPOINT, 1),
    );

    assert_eq!(status, DBG_EXCEPTION_NOT_HANDLED);
    assert_eq!(debugger.exit_code, None);
}

#[test]
fn unhandled_exception_passed_through() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::classifying(ExceptionType::NotHandled);

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    let status = dispatch_ok(
        &mut debugger,
        &mut handler,
        &exception_event(ROOT_PID, ROOT_TID, 0xC0000005, 1),
    );

    assert_eq!(status, DBG_EXCEPTION_NOT_HANDLED);
    assert_eq!(debugger.exit_code, None);
}

#[test]
fn error_exception_passed_through() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::classifying(ExceptionType::Error);

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    let status = dispatch_ok(
        &mut debugger,
        &mut handler,
        &exception_event(ROOT_PID, ROOT_TID, 0xC0000005, 0),
    );

    assert_eq!(status, DBG_EXCEPTION_NOT_HANDLED);
    assert_eq!(debugger.exit_code, None);
}

#[test]
fn cpp_exception_passed_through_by_default() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::classifying(ExceptionType::CppError);

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    let status = dispatch_ok(
        &mut debugger,
        &mut handler,
        &exception_event(ROOT_PID, ROOT_TID, CPP_EXCEPTION, 1),
    );

    assert_eq!(status, DBG_EXCEPTION_NOT_HANDLED);
    assert_eq!(debugger.exit_code, None);
}

#[test]
fn cpp_exception_swallowed_when_continuing() {
    let options = DebuggerOptions {
        continue_after_cpp_exception: true,
        ..DebuggerOptions::default()
    };
    let mut debugger = Debugger::new(options);
    let mut handler = ScriptedHandler::classifying(ExceptionType::CppError);

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    let status = dispatch_ok(
        &mut debugger,
        &mut handler,
        &exception_event(ROOT_PID, ROOT_TID, CPP_EXCEPTION, 1),
    );

    assert_eq!(status, DBG_CONTINUE);
    assert_eq!(debugger.exit_code, Some(CPP_EXCEPTION as i32));
}

#[test]
fn transient_exit_code_only_latches_for_the_root() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::classifying(ExceptionType::InvalidBreakPoint);

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    dispatch_ok(&mut debugger, &mut handler, &create_process_event(CHILD_PID, CHILD_TID));
    dispatch_ok(
        &mut debugger,
        &mut handler,
        &exception_event(CHILD_PID, CHILD_TID, EXCEPTION_BREAKPOINT, 1),
    );

    assert_eq!(debugger.exit_code, None);
}

#[test]
fn handler_sees_exit_process_before_removal() {
    let mut debugger = Debugger::new(DebuggerOptions::default());
    let mut handler = ScriptedHandler::default();

    dispatch_ok(&mut debugger, &mut handler, &create_process_event(ROOT_PID, ROOT_TID));
    dispatch_ok(&mut debugger, &mut handler, &load_dll_event(ROOT_PID, ROOT_TID));
    dispatch_ok(&mut debugger, &mut handler, &exit_process_event(ROOT_PID, ROOT_TID, 0));

    assert_eq!(handler.calls, vec!["create_process", "load_dll", "exit_process"]);
}
