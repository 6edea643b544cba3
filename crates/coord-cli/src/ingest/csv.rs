//! Flat CSV ingest (§6.1.1): header
//! `message_id,user_id,username,repost_id,reply_id,message,timestamp,urls`,
//! with `urls` a space-delimited list of URLs within the cell.

use std::path::Path;

use coord_core::model::NormalizedRow;
use tracing::instrument;

use super::IngestResult;

#[derive(Debug, serde::Deserialize)]
struct Record {
    message_id: String,
    user_id: String,
    username: String,
    #[serde(deserialize_with = "empty_is_none")]
    repost_id: Option<String>,
    #[serde(deserialize_with = "empty_is_none")]
    reply_id: Option<String>,
    message: String,
    timestamp: f64,
    #[serde(default)]
    urls: String,
}

fn empty_is_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn parse_file(path: &Path) -> IngestResult<Vec<NormalizedRow>> {
    let mut reader = ::csv::Reader::from_path(path)?;

    let mut rows = vec![];
    for result in reader.deserialize() {
        let record: Record = result?;
        let urls = record
            .urls
            .split_whitespace()
            .map(str::to_string)
            .collect();

        rows.push(NormalizedRow {
            message_id: record.message_id,
            user_id: record.user_id,
            username: record.username,
            repost_id: record.repost_id,
            reply_id: record.reply_id,
            message: record.message,
            timestamp: record.timestamp,
            urls,
        });
    }

    Ok(rows)
}
