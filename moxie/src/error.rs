//! The error taxonomy the core distinguishes (spec.md §7).
//!
//! Library modules return `Result<T, MoxieError>` so callers can match on
//! kind (a failed pattern compile is handled differently from a dead
//! peer). `main.rs` converts to `anyhow::Result` at the process boundary,
//! the same layering the teacher uses (typed/contextual errors inside
//! `src/socket`, `src/broker`; `anyhow` in `main.rs`).

use thiserror::Error;

/// Error kinds distinguished by the core (spec.md §7).
#[derive(Debug, Error)]
pub enum MoxieError {
    /// An RPC call or socket operation failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Discovery returned no peers when one was required
    /// (`LookupOne` with nothing visible).
    #[error("no instance of service {0:?} is visible")]
    NoSuchService(String),

    /// A pattern failed to compile into a regex.
    #[error("pattern failed to compile: {0}")]
    CompileFailure(#[from] regex::Error),

    /// A callback name was looked up but nothing is registered under it.
    #[error("no callback registered under name {0:?}")]
    NotRegistered(String),

    /// The terminal or the history store failed in a way the Controller
    /// cannot recover from.
    #[error("fatal I/O failure: {0}")]
    FatalIo(String),

    /// The distinguished Ctrl-C condition (spec.md §4.4, §9). Unwinds the
    /// editor and is reported as a clean exit, never printed as an error.
    #[error("user requested quit")]
    UserQuit,
}

impl MoxieError {
    /// True for [`MoxieError::UserQuit`], the only kind that maps to a
    /// successful process exit (spec.md §7).
    #[must_use]
    pub fn is_user_quit(&self) -> bool {
        matches!(self, MoxieError::UserQuit)
    }
}

pub type Result<T> = std::result::Result<T, MoxieError>;
