//! Source selection.
//!
//! Turns command-line source arguments into the ordered list of files and
//! directories to archive. A literal path contributes itself and, for a
//! directory, its whole subtree, stored under the path's own base name. A
//! wildcard argument is matched against the immediate children of its parent
//! directory only; every match is then handled like a literal path. So
//! `d1` stores `d1/f1` while `d1/*` stores `f1`.

use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// One source argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Literal(PathBuf),
    Glob(String),
}

impl SourceSpec {
    /// Arguments containing `*` or `?` are wildcards, anything else is a path.
    pub fn parse(arg: &str) -> Self {
        if has_glob_chars(arg) {
            SourceSpec::Glob(arg.to_string())
        } else {
            SourceSpec::Literal(PathBuf::from(arg))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A file or directory selected for archiving.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Where the entry lives on disk.
    pub source: PathBuf,
    /// `/`-separated path inside the archive, without a trailing separator.
    pub relative_path: String,
    pub kind: EntryKind,
    pub modified: Option<SystemTime>,
    /// Full `st_mode` on Unix hosts.
    pub unix_mode: Option<u32>,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Expand `specs` into archive entries, in argument order.
///
/// The entries of one argument are sorted by their stored path, so identical
/// trees always yield identical entry lists.
pub fn collect(specs: &[SourceSpec]) -> Result<Vec<Entry>> {
    let mut collector = PathCollector::default();
    for spec in specs {
        match spec {
            SourceSpec::Literal(path) => collector.add_literal(path)?,
            SourceSpec::Glob(pattern) => collector.add_glob(pattern)?,
        }
    }
    Ok(collector.entries)
}

#[derive(Default)]
struct PathCollector {
    entries: Vec<Entry>,
    seen: HashSet<String>,
}

impl PathCollector {
    fn add_literal(&mut self, path: &Path) -> Result<()> {
        match std::fs::metadata(path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(Error::io(path, e)),
        }

        let prefix = base_name(path)?;
        let mut batch = Vec::new();
        walk_tree(path, prefix.as_deref(), &mut batch)?;
        self.extend_sorted(batch);
        Ok(())
    }

    fn add_glob(&mut self, pattern: &str) -> Result<()> {
        let pattern_path = Path::new(pattern);
        let parent = match pattern_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name_pattern = pattern_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::NoMatch(pattern.to_string()))?;

        let matcher = Pattern::new(name_pattern).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.msg.to_string(),
        })?;

        if !parent.is_dir() {
            return Err(Error::NoMatch(pattern.to_string()));
        }

        let mut matches = Vec::new();
        for dir_entry in std::fs::read_dir(parent).at(parent)? {
            let dir_entry = dir_entry.at(parent)?;
            let file_name = dir_entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(
                    "Skipping non UTF-8 name in {}: {:?}",
                    parent.display(),
                    file_name
                );
                continue;
            };
            if matcher.matches_with(name, MATCH_OPTIONS) {
                matches.push(name.to_string());
            }
        }

        if matches.is_empty() {
            return Err(Error::NoMatch(pattern.to_string()));
        }

        debug!("Pattern {pattern} matched {} entries", matches.len());

        let mut batch = Vec::new();
        for name in matches {
            walk_tree(&parent.join(&name), Some(&name), &mut batch)?;
        }
        self.extend_sorted(batch);
        Ok(())
    }

    fn extend_sorted(&mut self, mut batch: Vec<Entry>) {
        batch.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        for entry in batch {
            self.push(entry);
        }
    }

    fn push(&mut self, entry: Entry) {
        if !self.seen.insert(entry.relative_path.clone()) {
            warn!(
                "Skipping {}: '{}' is already in the archive",
                entry.source.display(),
                entry.relative_path
            );
            return;
        }
        self.entries.push(entry);
    }
}

/// Gather `root` and everything beneath it, stored under `prefix`.
///
/// A `None` prefix (filesystem root) stores the children directly.
fn walk_tree(root: &Path, prefix: Option<&str>, out: &mut Vec<Entry>) -> Result<()> {
    for item in WalkDir::new(root).follow_links(true) {
        let item = item.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::io(path, e.into())
        })?;

        let relative = relative_name(root, item.path(), prefix)?;
        if relative.is_empty() {
            continue;
        }

        let metadata = item.metadata().map_err(|e| {
            let path = item.path().to_path_buf();
            Error::io(path, e.into())
        })?;

        out.push(Entry {
            source: item.path().to_path_buf(),
            relative_path: relative,
            kind: if metadata.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            modified: metadata.modified().ok(),
            unix_mode: unix_mode(&metadata),
        });
    }
    Ok(())
}

/// The name a literal path is stored under. Resolves `.` and `..` through
/// the filesystem; the filesystem root has none.
fn base_name(path: &Path) -> Result<Option<String>> {
    let name = match path.file_name() {
        Some(name) => Some(name.to_os_string()),
        None => {
            let canonical = path.canonicalize().at(path)?;
            canonical.file_name().map(|n| n.to_os_string())
        }
    };

    name.map(|n| {
        n.into_string().map_err(|n| Error::UnencodableName {
            name: n.to_string_lossy().into_owned(),
            codepage: "UTF-8",
        })
    })
    .transpose()
}

/// Join `prefix` and the components of `path` below `root` with `/`.
fn relative_name(root: &Path, path: &Path, prefix: Option<&str>) -> Result<String> {
    let below = path.strip_prefix(root).unwrap_or(Path::new(""));

    let mut parts: Vec<&str> = prefix.into_iter().collect();
    for component in below.components() {
        if let Component::Normal(part) = component {
            let part = part.to_str().ok_or_else(|| Error::UnencodableName {
                name: path.to_string_lossy().into_owned(),
                codepage: "UTF-8",
            })?;
            parts.push(part);
        }
    }
    Ok(parts.join("/"))
}

fn has_glob_chars(arg: &str) -> bool {
    arg.contains('*') || arg.contains('?')
}

#[cfg(unix)]
fn unix_mode(metadata: &Metadata) -> Option<u32> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.mode())
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &Metadata) -> Option<u32> {
    None
}
