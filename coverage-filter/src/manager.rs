// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Composition of the wildcard filter with unified-diff filters.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::settings::{CoverageFilterSettings, UnifiedDiffSettings};
use crate::unified_diff::UnifiedDiffFilter;
use crate::wildcard::WildcardCoverageFilter;

/// Option named in the unmatched-path warning.
const VERBOSE_OPTION: &str = "verbose";

const SEPARATOR_LINE: &str =
    "------------------------------------------------------------";

/// Decides module, source-file and line eligibility for a coverage run.
///
/// Wildcard rules apply first. When unified-diff filters are configured,
/// a source file (and the resolved line) must additionally appear in at
/// least one diff; an empty diff-filter list means no diff restriction.
pub struct CoverageFilterManager {
    wildcard_filter: WildcardCoverageFilter,
    unified_diff_filters: Vec<UnifiedDiffFilter>,
}

impl CoverageFilterManager {
    /// Build the manager from run settings, reading each configured diff
    /// file.
    pub fn new(
        settings: &CoverageFilterSettings,
        diff_settings: &[UnifiedDiffSettings],
    ) -> Result<Self> {
        let unified_diff_filters = diff_settings
            .iter()
            .map(UnifiedDiffFilter::load)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_filters(
            WildcardCoverageFilter::new(settings)?,
            unified_diff_filters,
        ))
    }

    pub fn from_filters(
        wildcard_filter: WildcardCoverageFilter,
        unified_diff_filters: Vec<UnifiedDiffFilter>,
    ) -> Self {
        CoverageFilterManager {
            wildcard_filter,
            unified_diff_filters,
        }
    }

    /// Diff filters are file-granular and never restrict modules.
    pub fn is_module_selected(&self, module: &Path) -> bool {
        self.wildcard_filter.is_module_selected(module)
    }

    /// Mutates matched-path tracking inside the diff filters.
    pub fn is_source_file_selected(&mut self, source_file: &Path) -> bool {
        if !self.wildcard_filter.is_source_file_selected(source_file) {
            return false;
        }

        self.unified_diff_filters.is_empty()
            || self
                .unified_diff_filters
                .iter_mut()
                .any(|filter| filter.is_source_file_selected(source_file))
    }

    /// Decide whether `line` of `source_file` is measured.
    ///
    /// Debug info can report a statement on a line the diff does not name
    /// directly (blank, comment or continuation lines above it), so the
    /// line is first attributed to the nearest executable line at or below
    /// it. A line with no executable predecessor cannot be attributed and
    /// is rejected.
    pub fn is_line_selected(
        &mut self,
        source_file: &Path,
        line: u32,
        executable_lines: &BTreeSet<u32>,
    ) -> bool {
        if self.unified_diff_filters.is_empty() {
            return true;
        }

        let line = match executable_line_or_previous(line, executable_lines) {
            Some(line) => line,
            None => return false,
        };

        self.unified_diff_filters
            .iter_mut()
            .any(|filter| filter.is_line_selected(source_file, line))
    }

    /// Warning lines describing diff paths that matched no source file.
    /// Empty when every diff path was seen.
    pub fn compute_warning_message_lines(&self, max_unmatch_paths: usize) -> Vec<String> {
        let mut unmatched: BTreeSet<PathBuf> = BTreeSet::new();
        for filter in &self.unified_diff_filters {
            unmatched.extend(filter.unmatched_paths());
        }

        let mut lines = Vec::new();
        if unmatched.is_empty() {
            return lines;
        }

        lines.push(SEPARATOR_LINE.to_string());
        lines.push(format!(
            "You have {} path(s) inside unified diff file(s) that were ignored",
            unmatched.len()
        ));
        lines.push("because they did not match any path from pdb files.".to_string());
        lines.push(format!("To see all files use --{}", VERBOSE_OPTION));

        for (index, path) in unmatched.iter().enumerate() {
            if index >= max_unmatch_paths {
                lines.push("\t...".to_string());
                break;
            }
            lines.push(format!("\t- {}", path.display()));
        }

        lines
    }
}

/// Resolve a line to itself when executable, otherwise to the closest
/// executable line before it. `None` when no executable line precedes it.
fn executable_line_or_previous(line: u32, executable_lines: &BTreeSet<u32>) -> Option<u32> {
    if executable_lines.contains(&line) {
        return Some(line);
    }

    executable_lines.range(..line).next_back().copied()
}
