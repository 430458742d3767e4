// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-file line restriction derived from one unified diff.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::diff::{parse_unified_diff, FileDiff};
use crate::settings::UnifiedDiffSettings;

/// Restricts coverage to the lines a unified diff touched.
///
/// File and line queries mark the diff entries they match;
/// `unmatched_paths` afterwards reports the entries no queried source file
/// ever matched. Queries therefore take `&mut self`.
pub struct UnifiedDiffFilter {
    entries: Vec<DiffEntry>,
}

struct DiffEntry {
    /// The path as resolved for display, root folder applied.
    display_path: PathBuf,

    /// Lower-cased, separator-folded components used for matching.
    components: Vec<String>,

    lines: BTreeSet<u32>,
    matched: bool,
}

impl UnifiedDiffFilter {
    /// Read and parse the configured diff file.
    pub fn load(settings: &UnifiedDiffSettings) -> Result<Self> {
        let text = fs::read_to_string(&settings.diff_path)
            .with_context(|| format!("reading unified diff {}", settings.diff_path.display()))?;
        let diffs = parse_unified_diff(&text)
            .with_context(|| format!("parsing unified diff {}", settings.diff_path.display()))?;

        Ok(Self::from_file_diffs(diffs, settings.root_folder.as_deref()))
    }

    pub fn from_file_diffs(diffs: Vec<FileDiff>, root_folder: Option<&Path>) -> Self {
        let mut entries: Vec<DiffEntry> = Vec::new();

        for diff in diffs {
            let resolved = match root_folder {
                Some(root) if diff.path.is_relative() => root.join(&diff.path),
                _ => diff.path,
            };
            let components = path_components(&resolved);

            // A file split over several diff sections contributes one entry.
            if let Some(entry) = entries.iter_mut().find(|e| e.components == components) {
                entry.lines.extend(diff.lines);
            } else {
                entries.push(DiffEntry {
                    display_path: resolved,
                    components,
                    lines: diff.lines,
                    matched: false,
                });
            }
        }

        UnifiedDiffFilter { entries }
    }

    /// True if the diff names `source_file`. Marks the matching entry.
    pub fn is_source_file_selected(&mut self, source_file: &Path) -> bool {
        self.find_entry(source_file).is_some()
    }

    /// True if the diff touched `line` of `source_file`. Marks the entry.
    pub fn is_line_selected(&mut self, source_file: &Path, line: u32) -> bool {
        match self.find_entry(source_file) {
            Some(entry) => entry.lines.contains(&line),
            None => false,
        }
    }

    /// Diff paths that no queried source file has matched so far.
    pub fn unmatched_paths(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|e| !e.matched)
            .map(|e| e.display_path.clone())
            .collect()
    }

    fn find_entry(&mut self, source_file: &Path) -> Option<&mut DiffEntry> {
        let source = path_components(source_file);

        let entry = self
            .entries
            .iter_mut()
            .find(|e| !e.components.is_empty() && source.ends_with(&e.components))?;

        entry.matched = true;
        Some(entry)
    }
}

/// Fold a path to lower-cased components so paths from a diff compare equal
/// to paths from pdb files regardless of case and separator style.
fn path_components(path: &Path) -> Vec<String> {
    path.to_string_lossy()
        .replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .map(|part| part.to_lowercase())
        .collect()
}
