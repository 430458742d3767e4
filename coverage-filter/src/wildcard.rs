// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wildcard module and source-file filtering, compiled to regexes.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

use crate::settings::{CoverageFilterSettings, WildcardPatterns};

pub struct WildcardCoverageFilter {
    modules: CompiledPatterns,
    source_files: CompiledPatterns,
}

impl WildcardCoverageFilter {
    pub fn new(settings: &CoverageFilterSettings) -> Result<Self> {
        Ok(WildcardCoverageFilter {
            modules: CompiledPatterns::new(&settings.modules)?,
            source_files: CompiledPatterns::new(&settings.source_files)?,
        })
    }

    pub fn is_module_selected(&self, module: &Path) -> bool {
        self.modules.is_selected(&module.to_string_lossy())
    }

    pub fn is_source_file_selected(&self, source_file: &Path) -> bool {
        self.source_files.is_selected(&source_file.to_string_lossy())
    }
}

struct CompiledPatterns {
    selected: Vec<Regex>,
    excluded: Vec<Regex>,
}

impl CompiledPatterns {
    fn new(patterns: &WildcardPatterns) -> Result<Self> {
        Ok(CompiledPatterns {
            selected: compile_all(&patterns.selected)?,
            excluded: compile_all(&patterns.excluded)?,
        })
    }

    fn is_selected(&self, text: &str) -> bool {
        let selected =
            self.selected.is_empty() || self.selected.iter().any(|re| re.is_match(text));

        selected && !self.excluded.iter().any(|re| re.is_match(text))
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| wildcard_to_regex(p)).collect()
}

/// Translate a `*` wildcard into an unanchored, case-insensitive regex.
fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let expr = pattern
        .split('*')
        .map(|part| regex::escape(part))
        .collect::<Vec<_>>()
        .join(".*");

    Regex::new(&format!("(?i){}", expr))
        .with_context(|| format!("invalid wildcard pattern: {}", pattern))
}
