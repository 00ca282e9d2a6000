//! Directory resolution for history/log state.
//!
//! Mirrors the teacher's `Config::config_dir()` pattern (resolve a base
//! directory, create it on demand, wrap filesystem errors with context)
//! but scoped to the single `--dir` flag moxie exposes (spec.md §6)
//! rather than a full settings file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Directory used for the history store and any on-disk state.
///
/// Defaults to `~/.moxie` when `--dir` is not given (spec.md §6).
#[derive(Debug, Clone)]
pub struct Dirs {
    root: PathBuf,
}

impl Dirs {
    /// Resolve the working directory, creating it if needed.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = match explicit {
            Some(p) => p.to_path_buf(),
            None => dirs::home_dir()
                .context("could not determine home directory for default --dir")?
                .join(".moxie"),
        };
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory: {}", root.display()))?;
        Ok(Self { root })
    }

    /// Path to the embedded history database (spec.md §6:
    /// `<dir>/controller.db`).
    #[must_use]
    pub fn history_db(&self) -> PathBuf {
        self.root.join("controller.db")
    }

    /// The resolved root directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
