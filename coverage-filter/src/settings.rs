// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Plain-data run settings consumed by the filter manager.

use std::path::PathBuf;

/// Wildcard rules for one filtered dimension.
///
/// `*` matches any run of characters; matching is case-insensitive and
/// unanchored. An empty `selected` list selects everything. `excluded`
/// always wins over `selected`.
#[derive(Clone, Debug, Default)]
pub struct WildcardPatterns {
    pub selected: Vec<String>,
    pub excluded: Vec<String>,
}

/// Module and source-file wildcard rules for a coverage run.
#[derive(Clone, Debug, Default)]
pub struct CoverageFilterSettings {
    pub modules: WildcardPatterns,
    pub source_files: WildcardPatterns,
}

/// One unified-diff restriction: the diff file itself, plus the folder that
/// relative paths inside the diff resolve against.
#[derive(Clone, Debug)]
pub struct UnifiedDiffSettings {
    pub diff_path: PathBuf,
    pub root_folder: Option<PathBuf>,
}
