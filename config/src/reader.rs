//! Declaration file reading
//!
//! Profile files are line oriented. [`DeclarationReader`] abstracts the
//! filesystem so that the profile code only deals with numbered lines, and
//! so that an absent file (a documented fallback) can be told apart from an
//! unreadable one (an error).

use crate::{ConfigError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One line of a declaration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationLine {
    /// Line content with comments and surrounding whitespace removed
    pub content: String,
    /// 1-based line number within `path`
    pub lineno: usize,
    /// File the line came from
    pub path: PathBuf,
}

/// Source of profile declaration files
pub trait DeclarationReader: Send + Sync {
    fn is_dir(&self, path: &Path) -> bool;

    fn exists(&self, path: &Path) -> bool;

    /// Whole file contents, `None` if the file does not exist
    fn read_text(&self, path: &Path) -> Result<Option<String>>;

    /// Meaningful lines of a file, or of every file in a directory.
    ///
    /// Comments and blank lines are dropped. Returns `None` when the path
    /// does not exist.
    fn read_lines(&self, path: &Path) -> Result<Option<Vec<DeclarationLine>>>;

    /// Every line of a file, unfiltered
    fn read(&self, path: &Path) -> Result<Option<Vec<DeclarationLine>>> {
        Ok(self.read_text(path)?.map(|text| {
            text.lines()
                .enumerate()
                .map(|(idx, line)| DeclarationLine {
                    content: line.trim_end().to_string(),
                    lineno: idx + 1,
                    path: path.to_path_buf(),
                })
                .collect()
        }))
    }
}

/// Reads declarations straight from the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReader;

impl FsReader {
    pub fn new() -> Self {
        Self
    }

    fn filtered_lines<'a>(path: &Path, text: &'a str) -> impl Iterator<Item = DeclarationLine> + 'a {
        let path = path.to_path_buf();
        text.lines().enumerate().filter_map(move |(idx, line)| {
            let content = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            }
            .trim();
            if content.is_empty() {
                None
            } else {
                Some(DeclarationLine {
                    content: content.to_string(),
                    lineno: idx + 1,
                    path: path.clone(),
                })
            }
        })
    }

    /// Regular files below `dir`, hidden and backup files skipped, in name order
    fn directory_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !name.starts_with('.') && !name.ends_with('~')
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(ErrorKind::Other, "filesystem loop"));
                ConfigError::io(path, source)
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }
}

impl DeclarationReader for FsReader {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_text(&self, path: &Path) -> Result<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::io(path, e)),
        }
    }

    fn read_lines(&self, path: &Path) -> Result<Option<Vec<DeclarationLine>>> {
        if path.is_dir() {
            let mut lines = Vec::new();
            for file in Self::directory_files(path)? {
                if let Some(text) = self.read_text(&file)? {
                    lines.extend(Self::filtered_lines(&file, &text));
                }
            }
            return Ok(Some(lines));
        }

        Ok(self
            .read_text(path)?
            .map(|text| Self::filtered_lines(path, &text).collect()))
    }
}
