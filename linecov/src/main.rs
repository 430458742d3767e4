// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command-line front end: runs a target under the coverage debug loop with
//! wildcard and unified-diff filtering.

use std::path::PathBuf;

use anyhow::Result;
use log::warn;
use structopt::StructOpt;

use coverage_filter::{
    CoverageFilterManager, CoverageFilterSettings, UnifiedDiffSettings, WildcardPatterns,
};

#[cfg(windows)]
mod handler;

/// Paths listed in the unmatched-diff warning before it truncates.
const MAX_UNMATCH_PATHS_FOR_WARNING: usize = 10;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "linecov",
    about = "Line coverage collector for native executables",
    setting = structopt::clap::AppSettings::TrailingVarArg
)]
struct Opt {
    /// Wildcard patterns selecting modules to cover.
    #[structopt(long = "modules")]
    modules: Vec<String>,

    /// Wildcard patterns excluding modules.
    #[structopt(long = "excluded-modules")]
    excluded_modules: Vec<String>,

    /// Wildcard patterns selecting source files.
    #[structopt(long = "sources")]
    sources: Vec<String>,

    /// Wildcard patterns excluding source files.
    #[structopt(long = "excluded-sources")]
    excluded_sources: Vec<String>,

    /// Restrict coverage to a unified diff: PATH or PATH?ROOT_FOLDER.
    #[structopt(long = "unified-diff")]
    unified_diff: Vec<String>,

    /// Also debug child processes.
    #[structopt(long = "cover-children")]
    cover_children: bool,

    /// Keep running after a C++ exception in the target.
    #[structopt(long = "continue-after-cpp-exception")]
    continue_after_cpp_exception: bool,

    /// Let assertion failures terminate the target.
    #[structopt(long = "stop-on-assert")]
    stop_on_assert: bool,

    /// Write a minidump when the target crashes.
    #[structopt(long = "dump-on-crash")]
    dump_on_crash: bool,

    /// Directory minidumps are written to.
    #[structopt(long = "dump-directory", parse(from_os_str), default_value = ".")]
    dump_directory: PathBuf,

    /// Verbose logging.
    #[structopt(short, long)]
    verbose: bool,

    /// The program to run, followed by its arguments.
    #[structopt(required = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    let level = if opt.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let settings = CoverageFilterSettings {
        modules: WildcardPatterns {
            selected: opt.modules.clone(),
            excluded: opt.excluded_modules.clone(),
        },
        source_files: WildcardPatterns {
            selected: opt.sources.clone(),
            excluded: opt.excluded_sources.clone(),
        },
    };
    let diff_settings = opt
        .unified_diff
        .iter()
        .map(|arg| parse_unified_diff_option(arg))
        .collect::<Vec<_>>();

    let mut filters = CoverageFilterManager::new(&settings, &diff_settings)?;

    let exit_code = run(&opt, &mut filters)?;

    for line in filters.compute_warning_message_lines(MAX_UNMATCH_PATHS_FOR_WARNING) {
        warn!("{}", line);
    }

    std::process::exit(exit_code);
}

/// `PATH?ROOT` picks the folder that relative diff paths resolve against.
fn parse_unified_diff_option(arg: &str) -> UnifiedDiffSettings {
    match arg.split_once('?') {
        Some((path, root)) => UnifiedDiffSettings {
            diff_path: path.into(),
            root_folder: Some(root.into()),
        },
        None => UnifiedDiffSettings {
            diff_path: arg.into(),
            root_folder: None,
        },
    }
}

#[cfg(windows)]
fn run(opt: &Opt, filters: &mut CoverageFilterManager) -> Result<i32> {
    use std::process::Command;

    use debugger::{Debugger, DebuggerOptions};

    use crate::handler::CollectorEventsHandler;

    let mut command = Command::new(&opt.command[0]);
    command.args(&opt.command[1..]);

    let mut debugger = Debugger::new(DebuggerOptions {
        cover_children: opt.cover_children,
        continue_after_cpp_exception: opt.continue_after_cpp_exception,
        stop_on_assert: opt.stop_on_assert,
        dump_on_crash: opt.dump_on_crash,
        dump_directory: opt.dump_directory.clone(),
    });

    let mut handler = CollectorEventsHandler::new(filters);
    let exit_code = debugger.debug(command, &mut handler)?;

    Ok(exit_code)
}

#[cfg(not(windows))]
fn run(_opt: &Opt, _filters: &mut CoverageFilterManager) -> Result<i32> {
    anyhow::bail!("the debug loop requires the win32 debugging api")
}
