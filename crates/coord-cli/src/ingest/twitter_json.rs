//! Newline-delimited JSON records approximating the Twitter v1.1/v2 shape
//! (§6.1.1), parsed with `serde_json`.

use std::fs;
use std::path::Path;

use coord_core::model::NormalizedRow;
use serde::Deserialize;
use snafu::ResultExt;
use tracing::{instrument, warn};

use super::{IngestResult, JsonSnafu, LOG_TARGET};

#[derive(Debug, Deserialize)]
struct RawUser {
    #[serde(alias = "id_str")]
    id: Option<String>,
    author_id: Option<String>,
    #[serde(alias = "screen_name")]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUrlEntity {
    expanded_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntities {
    #[serde(default)]
    urls: Vec<RawUrlEntity>,
}

#[derive(Debug, Deserialize)]
struct RawTweet {
    #[serde(alias = "id_str")]
    id: Option<String>,
    user: Option<RawUser>,
    author_id: Option<String>,
    username: Option<String>,
    retweeted_status: Option<Box<RetweetedStatus>>,
    in_reply_to_status_id_str: Option<String>,
    #[serde(alias = "text")]
    full_text: Option<String>,
    created_at: Option<String>,
    timestamp_ms: Option<String>,
    #[serde(default)]
    entities: RawEntities,
}

#[derive(Debug, Deserialize)]
struct RetweetedStatus {
    #[serde(alias = "id_str")]
    id: Option<String>,
}

/// Prefers `timestamp_ms` (epoch milliseconds, as a string) since it's
/// unambiguous; `created_at`'s classic weekday-month-day format is accepted
/// only when it's already a bare epoch-seconds string, which is what the
/// CSV-shaped fixtures in this corpus use.
fn extract_timestamp(tweet: &RawTweet) -> f64 {
    if let Some(ms) = &tweet.timestamp_ms {
        if let Ok(ms) = ms.parse::<f64>() {
            return ms / 1000.0;
        }
    }
    if let Some(created_at) = &tweet.created_at {
        if let Ok(secs) = created_at.parse::<f64>() {
            return secs;
        }
    }
    0.0
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn parse_file(path: &Path) -> IngestResult<Vec<NormalizedRow>> {
    let content = fs::read_to_string(path)
        .context(super::IoSnafu { path: path.display().to_string() })?;

    let mut rows = vec![];
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let tweet: RawTweet = serde_json::from_str(line).context(JsonSnafu {
            path: path.display().to_string(),
            line: idx + 1,
        })?;

        let Some(message_id) = tweet.id.clone() else {
            warn!(target: LOG_TARGET, line = idx + 1, "skipping tweet with no id");
            continue;
        };

        let user_id = tweet
            .user
            .as_ref()
            .and_then(|u| u.id.clone())
            .or_else(|| tweet.author_id.clone())
            .unwrap_or_default();
        let username = tweet
            .user
            .as_ref()
            .and_then(|u| u.username.clone())
            .or_else(|| tweet.username.clone())
            .unwrap_or_default();

        let repost_id = tweet.retweeted_status.as_ref().and_then(|r| r.id.clone());
        let reply_id = tweet.in_reply_to_status_id_str.clone();

        let message = tweet.full_text.clone().unwrap_or_default();
        let timestamp = extract_timestamp(&tweet);
        let urls = tweet
            .entities
            .urls
            .iter()
            .filter_map(|u| u.expanded_url.clone())
            .collect();

        rows.push(NormalizedRow {
            message_id,
            user_id,
            username,
            repost_id,
            reply_id,
            message,
            timestamp,
            urls,
        });
    }

    Ok(rows)
}
