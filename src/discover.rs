use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("Invalid glob pattern '{pattern}': {source}")]
    GlobError {
        pattern: String,
        source: globset::Error,
    },
}

/// Compiled include/exclude patterns. Patterns prefixed with `!` exclude.
pub struct CompiledPatterns {
    includes: GlobSet,
    excludes: GlobSet,
}

impl CompiledPatterns {
    pub fn compile(patterns: &[String]) -> Result<CompiledPatterns, DiscoverError> {
        let mut includes = GlobSetBuilder::new();
        let mut excludes = GlobSetBuilder::new();
        for pattern in patterns {
            let (builder, text) = match pattern.strip_prefix('!') {
                Some(rest) => (&mut excludes, rest),
                None => (&mut includes, pattern.as_str()),
            };
            let glob = Glob::new(text).map_err(|source| DiscoverError::GlobError {
                pattern: pattern.clone(),
                source,
            })?;
            builder.add(glob);
        }
        Ok(CompiledPatterns {
            includes: includes.build().map_err(|source| DiscoverError::GlobError {
                pattern: String::new(),
                source,
            })?,
            excludes: excludes.build().map_err(|source| DiscoverError::GlobError {
                pattern: String::new(),
                source,
            })?,
        })
    }

    pub fn matches(&self, relative: &Path) -> bool {
        self.includes.is_match(relative) && !self.excludes.is_match(relative)
    }
}

/// Walk the source root and collect files matching the configured globs.
/// Returns the sorted file list plus non-fatal walk warnings.
pub fn discover_files(
    source_root: &Path,
    patterns: &[String],
) -> Result<(Vec<PathBuf>, Vec<String>), DiscoverError> {
    let compiled = CompiledPatterns::compile(patterns)?;
    let mut files = Vec::new();
    let mut warnings = Vec::new();
    for entry in WalkBuilder::new(source_root).build() {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    continue;
                }
                let path = entry.path();
                let Ok(relative) = path.strip_prefix(source_root) else {
                    continue;
                };
                if compiled.matches(relative) {
                    files.push(path.to_path_buf());
                }
            }
            Err(e) => warnings.push(format!("skipped during discovery: {e}")),
        }
    }
    files.sort();
    Ok((files, warnings))
}
