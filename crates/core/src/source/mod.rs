//! Source document (NZB) retrieval.
//!
//! The indexer URL arrives HTML-entity encoded; it is decoded once at config
//! load. The fetched body must look like an NZB/XML document before anything
//! is submitted to the daemon.

mod decode;
mod fetch;

pub use decode::{decode_html, nzb_file_name, validate_document};
pub use fetch::SourceFetcher;

use thiserror::Error;

/// Errors that can occur while retrieving the source document.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source request failed: {0}")]
    Request(String),

    #[error("Source request timed out")]
    Timeout,

    #[error("Source returned HTTP {status}")]
    Http { status: u16 },

    #[error("Source document is not an NZB (starts with {preview:?})")]
    NotAnNzb { preview: String },
}
