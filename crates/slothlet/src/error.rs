// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Error types for slothlet operations.

use thiserror::Error;

/// Result type for slothlet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, mutating, or invoking a bound API.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed public input: api paths, hook patterns, merge options.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A folder or file could not be read.
    #[error("Access error: {0}")]
    Access(String),

    /// Cross-module overwrite denied while `allowApiOverwrite` is false.
    #[error("Path '{path}' is owned by module '{owner}'")]
    Ownership {
        /// The contested api path.
        path: String,
        /// The module id currently on top of the ownership stack.
        owner: String,
    },

    /// The operation requires a capability the instance was created without.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A lazy placeholder failed to resolve its subtree.
    #[error("Failed to materialize '{path}': {source}")]
    Materialization {
        /// Path of the placeholder that failed.
        path: String,
        /// The underlying discovery/loader failure.
        #[source]
        source: Box<Error>,
    },

    /// A user hook raised during the invocation pipeline.
    #[error("Hook '{hook_id}' failed for '{path}': {source}")]
    Hook {
        /// Path of the invocation the hook was observing.
        path: String,
        /// Id of the offending hook.
        hook_id: String,
        /// The error the handler returned.
        #[source]
        source: Box<Error>,
    },

    /// The leaf function itself raised.
    #[error("Target '{path}' failed: {source}")]
    Target {
        /// Path of the invoked leaf.
        path: String,
        /// The error the function returned.
        #[source]
        source: Box<Error>,
    },

    /// IO error surfaced from discovery or a decoder.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON data file failed to parse.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML data file failed to parse.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Free-form failure raised by module code or test doubles.
    #[error("{0}")]
    Module(String),
}

impl Error {
    /// Shorthand for a [`Error::Validation`] with a formatted message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Shorthand for a [`Error::Configuration`] with a formatted message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// True when the error (or its outermost wrapper) came from user code
    /// rather than the loader itself.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::Hook { .. } | Error::Target { .. } | Error::Module(_)
        )
    }
}
