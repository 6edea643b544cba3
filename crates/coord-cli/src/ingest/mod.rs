//! Platform -> normalized-row adapters (§6.1.1). The core only ever sees
//! [`coord_core::model::NormalizedRow`]; nothing here talks to the store.

pub mod csv;
pub mod twitter_json;

use std::path::Path;

use coord_core::model::NormalizedRow;
use snafu::Snafu;

const LOG_TARGET: &str = "coord_cli::ingest";

#[derive(Debug, Snafu)]
pub enum IngestError {
    #[snafu(display("failed to read {path}: {source}"))]
    Io { path: String, source: std::io::Error },
    #[snafu(display("malformed JSON on line {line} of {path}: {source}"))]
    Json { path: String, line: usize, source: serde_json::Error },
    #[snafu(transparent)]
    Csv { source: ::csv::Error },
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestFormat {
    TwitterJson,
    Csv,
}

pub fn parse_file(format: IngestFormat, path: &Path) -> IngestResult<Vec<NormalizedRow>> {
    match format {
        IngestFormat::TwitterJson => twitter_json::parse_file(path),
        IngestFormat::Csv => csv::parse_file(path),
    }
}
