// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Unified-diff parsing.
//!
//! Produces, per file named in a diff, the set of line numbers the diff
//! added or modified, numbered in the post-image of the file.

use std::collections::BTreeSet;
use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiffParseError {
    #[error("malformed hunk header at line {line}: {text}")]
    MalformedHunkHeader { line: usize, text: String },

    #[error("unexpected content at line {line} inside a hunk")]
    UnexpectedHunkLine { line: usize },
}

/// Added-or-modified lines of one file in a diff.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileDiff {
    pub path: PathBuf,
    pub lines: BTreeSet<u32>,
}

lazy_static! {
    static ref HUNK_HEADER: Regex =
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("static hunk regex");
}

struct HunkProgress {
    next_line: u32,
    old_remaining: u32,
    new_remaining: u32,
}

impl HunkProgress {
    fn done(&self) -> bool {
        self.old_remaining == 0 && self.new_remaining == 0
    }
}

pub fn parse_unified_diff(text: &str) -> Result<Vec<FileDiff>, DiffParseError> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut hunk: Option<HunkProgress> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;

        if let Some(progress) = hunk.as_mut() {
            if !progress.done() {
                match raw.as_bytes().first() {
                    Some(b'+') => {
                        if let Some(file) = current.as_mut() {
                            file.lines.insert(progress.next_line);
                        }
                        progress.next_line += 1;
                        progress.new_remaining = progress.new_remaining.saturating_sub(1);
                    }
                    Some(b'-') => {
                        progress.old_remaining = progress.old_remaining.saturating_sub(1);
                    }
                    // Some tools emit a truly empty line for empty context.
                    Some(b' ') | None => {
                        progress.next_line += 1;
                        progress.new_remaining = progress.new_remaining.saturating_sub(1);
                        progress.old_remaining = progress.old_remaining.saturating_sub(1);
                    }
                    // "\ No newline at end of file" consumes nothing.
                    Some(b'\\') => {}
                    Some(_) => {
                        return Err(DiffParseError::UnexpectedHunkLine { line: line_number })
                    }
                }
                continue;
            }
        }

        if let Some(path) = raw.strip_prefix("+++ ") {
            if let Some(file) = current.take() {
                files.push(file);
            }
            hunk = None;
            current = file_entry(path);
        } else if raw.starts_with("@@") {
            hunk = Some(parse_hunk_header(raw, line_number)?);
        }
        // "---" headers, "diff --git", "index" and mode lines carry no
        // line information.
    }

    if let Some(file) = current.take() {
        files.push(file);
    }

    Ok(files)
}

fn file_entry(raw: &str) -> Option<FileDiff> {
    // "diff -u" style headers append a tab and a timestamp.
    let raw = raw.split('\t').next().unwrap_or(raw).trim();

    // A deleted file has no post-image to cover.
    if raw == "/dev/null" {
        return None;
    }

    let raw = raw.strip_prefix("b/").unwrap_or(raw);

    Some(FileDiff {
        path: PathBuf::from(raw),
        lines: BTreeSet::new(),
    })
}

fn parse_hunk_header(raw: &str, line_number: usize) -> Result<HunkProgress, DiffParseError> {
    let malformed = || DiffParseError::MalformedHunkHeader {
        line: line_number,
        text: raw.to_string(),
    };

    let captures = HUNK_HEADER.captures(raw).ok_or_else(malformed)?;

    let old_remaining = capture_u32(&captures, 2, 1).ok_or_else(malformed)?;
    let next_line = capture_u32(&captures, 3, 1).ok_or_else(malformed)?;
    let new_remaining = capture_u32(&captures, 4, 1).ok_or_else(malformed)?;

    Ok(HunkProgress {
        next_line,
        old_remaining,
        new_remaining,
    })
}

fn capture_u32(captures: &regex::Captures<'_>, index: usize, default: u32) -> Option<u32> {
    match captures.get(index) {
        Some(m) => m.as_str().parse().ok(),
        None => Some(default),
    }
}
