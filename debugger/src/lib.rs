// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(windows)]

pub mod debug_event;
pub mod debugger;
mod dump;

pub use crate::debug_event::{DebugEvent, DebugEventInfo};
pub use crate::debugger::{
    DebugEventsHandler, Debugger, DebuggerError, DebuggerOptions, ExceptionType,
};
