//! Error types for bind operations.
//!
//! Two kinds of failure flow through the binder. Authoring problems
//! (duplicate keys, unresolved references, missing attributes) are
//! accumulated in the [`Messages`](crate::binder::messages::Messages) sink so
//! one run reports them all. Environment and structural problems (missing
//! source files, format violations, an empty transform diff) abort the
//! current phase through the [`Error`] type defined here.
//!
//! The [`Context`] and [`ErrorExt`] traits and the crate `bail!` macro give
//! call sites anyhow-style ergonomics while keeping a typed error.

use std::{
    fmt::Display,
    io,
    path::{self, PathBuf},
};
use thiserror::Error as DeriveError;

/// Errors returned by the binder.
#[derive(Debug, DeriveError)]
#[non_exhaustive]
pub enum Error {
    /// Error with context. Created by the [`Context`] trait.
    #[error("{0}: {1}")]
    Context(String, Box<Self>),

    /// File system error with path context.
    ///
    /// Created by the [`ErrorExt`] trait's `fs_context` method.
    #[error("{context} {path}: {error}", path = .path.display())]
    Fs {
        /// Context describing the operation (e.g. "reading source file").
        context: &'static str,
        /// Path that was being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        error: io::Error,
    },

    /// Child process execution error (external validator).
    #[error("failed to run command {command}: {error}")]
    CommandFailed {
        /// Command that failed to execute.
        command: String,
        /// The underlying error.
        error: io::Error,
    },

    /// Generic I/O error.
    #[error("{0}")]
    Io(#[from] io::Error),

    /// JSON error (debug-database dump).
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// XML emission error (bundle manifests).
    #[error("{0}")]
    Xml(#[from] quick_xml::Error),

    /// Binary parse error (bundle stub PE analysis).
    #[error("binary parse error: {0}")]
    BinaryParse(#[from] goblin::error::Error),

    /// Path prefix stripping error (layout transfers).
    #[error("{0}")]
    Strip(#[from] path::StripPrefixError),

    /// Directory walk error (layout transfers).
    #[error("{0}")]
    Walkdir(#[from] walkdir::Error),

    /// String is not valid UTF-8.
    #[error("string is not UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    /// A binder variable reference could not be parsed.
    #[error("ill-formed variable reference '{reference}' at {location}")]
    InvalidVariableReference {
        /// The malformed reference text.
        reference: String,
        /// Where the reference was authored.
        location: String,
    },

    /// A table the current output kind cannot proceed without is missing
    /// or empty.
    #[error("missing bundle information: {0}")]
    MissingBundleInfo(String),

    /// A required table is absent from the output.
    #[error("table '{0}' is required but missing")]
    MissingTable(String),

    /// A stream name derived from table and primary-key values exceeds the
    /// format limit and cannot be aliased.
    #[error("stream name '{name}' exceeds the maximum length of {max} characters")]
    StreamNameTooLong {
        /// The offending name.
        name: String,
        /// The format's maximum.
        max: usize,
    },

    /// The two synthetic transform databases are identical.
    #[error("transform generation produced no differences")]
    EmptyTransform,

    /// The merge session could not be committed.
    #[error("merge of module '{module}' failed: {reason}")]
    MergeFailed {
        /// The module reference id.
        module: String,
        /// Engine-reported reason.
        reason: String,
    },

    /// One or more accumulated authoring errors stopped the bind.
    #[error("bind failed with {0} error(s); no output was produced")]
    BindFailed(usize),

    /// Generic error with custom message.
    #[error("{0}")]
    Generic(String),
}

/// Convenient type alias for Result.
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for adding context to errors.
///
/// Works with both `Result<T>` and `Option<T>`.
pub trait Context<T> {
    /// Add context to an error.
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static;

    /// Add context to an error using a closure (lazy evaluation).
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> Context<T> for Result<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|e| Error::Context(context.to_string(), Box::new(e)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Error::Context(f().to_string(), Box::new(e)))
    }
}

impl<T> Context<T> for std::result::Result<T, io::Error> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|e| Error::Context(context.to_string(), Box::new(Error::Io(e))))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Error::Context(f().to_string(), Box::new(Error::Io(e))))
    }
}

impl<T> Context<T> for Option<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.ok_or_else(|| Error::Generic(context.to_string()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::Generic(f().to_string()))
    }
}

/// Extension trait for filesystem operations with automatic path context.
pub trait ErrorExt<T> {
    /// Add filesystem context to an I/O error.
    ///
    /// The `context` should be a present-tense verb phrase describing the
    /// operation, e.g. "reading source file", "creating cabinet".
    fn fs_context(self, context: &'static str, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> ErrorExt<T> for std::result::Result<T, std::io::Error> {
    fn fs_context(self, context: &'static str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|error| Error::Fs {
            context,
            path: path.into(),
            error,
        })
    }
}

/// Macro for early return with a [`Error::Generic`] error.
#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::binder::error::Error::Generic($msg.into()))
    };
    ($err:expr $(,)?) => {
        return Err($crate::binder::error::Error::Generic($err.to_string()))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::binder::error::Error::Generic(format!($fmt, $($arg)*)))
    };
}
