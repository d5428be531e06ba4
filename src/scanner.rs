// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Project scanner: walks directories, hashes files, and emits change events.
//!
//! Keeps an in-memory map of last-seen hashes so only real content changes
//! surface. The map can be warm-started from the store so untouched files
//! are not re-indexed after a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::Result;
use crate::types::{FileChange, IndexConfig};

/// Tracks per-file hashes and computes change sets.
pub struct Scanner {
    extensions: Vec<String>,
    exclude_globs: GlobSet,
    known_hashes: HashMap<PathBuf, String>,
}

impl Scanner {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude_patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            extensions: config.watch_extensions.clone(),
            exclude_globs: builder.build()?,
            known_hashes: HashMap::new(),
        })
    }

    /// Seed the hash map from persisted state. Existing entries survive so a
    /// warm start never downgrades fresher in-memory knowledge.
    pub fn warm_start(&mut self, hashes: HashMap<String, String>) {
        for (path, hash) in hashes {
            self.known_hashes.entry(PathBuf::from(path)).or_insert(hash);
        }
    }

    pub fn known_file_count(&self) -> usize {
        self.known_hashes.len()
    }

    /// Scan the given directories and emit changes since the last scan.
    ///
    /// Deletions are scoped to the scanned directories: files tracked in the
    /// map but outside `dirs` are left intact, so a targeted single-directory
    /// scan cannot spuriously declare other directories' files deleted.
    pub fn scan_for_changes(&mut self, dirs: &[PathBuf]) -> Vec<FileChange> {
        let mut changes = Vec::new();
        let mut seen: Vec<PathBuf> = Vec::new();

        for dir in dirs {
            let exclude_globs = &self.exclude_globs;
            for entry in WalkDir::new(dir)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !is_excluded(exclude_globs, e.path()))
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path().to_path_buf();
                if !self.is_watched(&path) {
                    continue;
                }

                let content = match std::fs::read(&path) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to read file");
                        continue;
                    }
                };
                let hash = hash_bytes(&content);
                seen.push(path.clone());

                match self.known_hashes.get(&path) {
                    Some(known) if *known == hash => {}
                    _ => {
                        self.known_hashes.insert(path.clone(), hash.clone());
                        changes.push(FileChange {
                            path,
                            hash,
                            exists: true,
                        });
                    }
                }
            }
        }

        // Deletion pass, bounded to the scanned roots.
        let deleted: Vec<PathBuf> = self
            .known_hashes
            .keys()
            .filter(|known| {
                dirs.iter().any(|dir| known.starts_with(dir)) && !seen.contains(known)
            })
            .cloned()
            .collect();
        for path in deleted {
            self.known_hashes.remove(&path);
            changes.push(FileChange {
                path,
                hash: String::new(),
                exists: false,
            });
        }

        changes
    }

    fn is_watched(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let lowered = ext.to_lowercase();
                self.extensions.iter().any(|w| w == &lowered)
            })
            .unwrap_or(false)
    }

}

fn is_excluded(exclude_globs: &GlobSet, path: &Path) -> bool {
    if let Some(name) = path.file_name() {
        if name.to_string_lossy().starts_with('.') {
            return true;
        }
    }
    exclude_globs.is_match(path)
}

/// SHA-256 hex digest of file content.
pub fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
