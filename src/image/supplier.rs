//! Work-set enumeration.
//!
//! A [`Supplier`] yields work-item identifiers one at a time and can report
//! the total up front. [`MultiExtensionSupplier`] lists a directory and
//! expands every multi-extension file into one item per image extension.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use super::fits::FitsFile;

/// Errors raised while configuring a supplier.
#[derive(Debug, Error)]
pub enum SupplierError {
    /// The file-name wildcard could not be compiled.
    #[error("invalid file pattern {pattern:?}: {source}")]
    Pattern {
        /// Pattern as configured.
        pattern: String,
        /// Underlying regex error.
        source: regex::Error,
    },
}

/// Lazy, finite, non-restartable source of work-item identifiers.
pub trait Supplier: Send {
    /// Total number of items the supplier will yield over its lifetime.
    fn total(&mut self) -> usize;

    /// Next unconsumed item, or `None` once exhausted.
    fn next_item(&mut self) -> Option<String>;
}

/// Supplier over a fixed list of identifiers.
#[derive(Debug, Clone, Default)]
pub struct ListSupplier {
    total: usize,
    items: VecDeque<String>,
}

impl ListSupplier {
    /// Supply `items` in order.
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: VecDeque<String> = items.into_iter().map(Into::into).collect();
        Self {
            total: items.len(),
            items,
        }
    }
}

impl Supplier for ListSupplier {
    fn total(&mut self) -> usize {
        self.total
    }

    fn next_item(&mut self) -> Option<String> {
        self.items.pop_front()
    }
}

/// Directory supplier that yields one item per image extension.
///
/// A file with exactly one extension yields its bare path; a file with more
/// yields `path[1]`, `path[2]`, ...; a primary-only file yields nothing.
/// Files are visited in sorted order and opened only when reached. The
/// total is computed from its own listing pass, independent of iteration.
#[derive(Debug)]
pub struct MultiExtensionSupplier {
    input_dir: PathBuf,
    pattern: Regex,
    files: Option<VecDeque<PathBuf>>,
    pending: VecDeque<String>,
    total: Option<usize>,
}

impl MultiExtensionSupplier {
    /// Enumerate files in `input_dir` whose names match the `*`/`?` wildcard.
    ///
    /// # Errors
    ///
    /// Returns [`SupplierError::Pattern`] if the wildcard is invalid.
    pub fn new(input_dir: impl Into<PathBuf>, pattern: &str) -> Result<Self, SupplierError> {
        Ok(Self {
            input_dir: input_dir.into(),
            pattern: wildcard_regex(pattern)?,
            files: None,
            pending: VecDeque::new(),
            total: None,
        })
    }

    /// Sorted matching files; listed once and cached.
    fn file_list(&mut self) -> &mut VecDeque<PathBuf> {
        let input_dir = &self.input_dir;
        let pattern = &self.pattern;
        self.files
            .get_or_insert_with(|| list_matching(input_dir, pattern).into())
    }
}

impl Supplier for MultiExtensionSupplier {
    fn total(&mut self) -> usize {
        if let Some(total) = self.total {
            return total;
        }
        let total = list_matching(&self.input_dir, &self.pattern)
            .iter()
            .map(|path| extension_count(path))
            .fold(0_usize, usize::saturating_add);
        self.total = Some(total);
        total
    }

    fn next_item(&mut self) -> Option<String> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            let path = self.file_list().pop_front()?;
            self.pending.extend(expand(&path));
        }
    }
}

/// Image extensions of `path` (HDUs after the primary); 0 if unreadable.
fn extension_count(path: &Path) -> usize {
    match FitsFile::open(path) {
        Ok(file) => file.hdu_count().saturating_sub(1),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unreadable file");
            0
        }
    }
}

fn expand(path: &Path) -> Vec<String> {
    let extensions = extension_count(path);
    let name = path.display().to_string();
    debug!(file = %name, extensions, "expanding work file");
    if extensions == 1 {
        return vec![name];
    }
    (1..=extensions).map(|i| format!("{name}[{i}]")).collect()
}

fn list_matching(dir: &Path, pattern: &Regex) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot list input directory");
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| pattern.is_match(n))
        })
        .collect();
    files.sort();
    files
}

/// Compile a shell-style wildcard (`*`, `?`) into an anchored regex.
fn wildcard_regex(pattern: &str) -> Result<Regex, SupplierError> {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|source| SupplierError::Pattern {
        pattern: pattern.to_owned(),
        source,
    })
}
