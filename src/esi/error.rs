use std::io;

use thiserror::Error;

use crate::http::StatusCode;
use crate::middleware::BoxError;

/// Errors raised while assembling an ESI page.
#[derive(Debug, Error)]
pub enum EsiError {
    /// The wrapped handler failed while its output was being captured.
    #[error("downstream handler failed: {0}")]
    Downstream(#[source] BoxError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("include nesting exceeds {max_depth} levels at {src}")]
    IncludeDepth { src: String, max_depth: usize },

    #[error("failed to write response body: {0}")]
    Io(#[from] io::Error),
}

impl EsiError {
    /// Converts into the pipeline's error type.
    ///
    /// A downstream failure is handed back as the exact error the handler
    /// raised; everything else is boxed.
    pub fn into_boxed(self) -> BoxError {
        match self {
            Self::Downstream(source) => source,
            other => Box::new(other),
        }
    }
}

/// Malformed ESI markup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unterminated <{tag}> tag at byte {offset}")]
    UnterminatedTag { tag: &'static str, offset: usize },

    #[error("<esi:include> at byte {offset} has no src attribute")]
    MissingSrc { offset: usize },

    #[error("<esi:remove> at byte {offset} is never closed")]
    UnclosedRemove { offset: usize },

    #[error("malformed attribute in <{tag}> at byte {offset}")]
    MalformedAttribute { tag: &'static str, offset: usize },
}

/// A fragment include that could not be resolved.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("include {url} answered {status}")]
    Status { url: String, status: StatusCode },

    #[error("include {url} is not addressable in-process")]
    InvalidUrl { url: String },

    #[error("include {url} failed: {source}")]
    Handler {
        url: String,
        #[source]
        source: BoxError,
    },
}

/// A fragment cache backend failure.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Invalid ESI layer configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid ESI options: {0}")]
    Json(#[from] serde_json::Error),

    #[error("marker header name must not be empty")]
    EmptyMarkerHeader,

    #[error("max_include_depth must be at least 1")]
    ZeroIncludeDepth,
}
