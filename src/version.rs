// Copyright 2025 Vectormap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Version information for vectormap
//!
//! This module provides version constants and build information.

/// Major version number
pub const MAJOR: u32 = 0;

/// Minor version number
pub const MINOR: u32 = 1;

/// Patch version number
pub const PATCH: u32 = 0;

use std::sync::OnceLock;

static VERSION: OnceLock<String> = OnceLock::new();

fn get_version() -> &'static String {
    VERSION.get_or_init(|| format!("{}.{}.{}", MAJOR, MINOR, PATCH))
}

/// Git commit hash at build time
/// Set via VECTORMAP_GIT_COMMIT environment variable during compilation
pub const GIT_COMMIT: &str = match option_env!("VECTORMAP_GIT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

/// Returns the full version string
pub fn version() -> &'static str {
    get_version()
}

/// Returns version info as a formatted string
pub fn version_info() -> String {
    format!("vectormap {} (commit: {})", get_version(), GIT_COMMIT)
}
