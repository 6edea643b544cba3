//! Row validation and insertion (§4.1, §7 `InputMalformed`/`DuplicateMessageId`).

use coord_util_error::FmtCompact as _;
use snafu::Snafu;
use tracing::{instrument, warn};

use super::{DbResult, LOG_TARGET, Store, tables};
use crate::model::{Message, NormalizedRow, Timestamp};

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum RowError {
    #[snafu(display("message_id is empty"))]
    EmptyMessageId,
    #[snafu(display("both repost_id and reply_id are set"))]
    RepostAndReply,
    #[snafu(display("timestamp {value} is not finite"))]
    NonFiniteTimestamp { value: f64 },
}

/// Summary of one `insert_messages` call (§4.1, §8 laws 1-2).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub accepted: u64,
    pub rejected_as_duplicate: u64,
    pub rejected_invalid: Vec<(String, RowError)>,
}

impl InsertReport {
    fn merge(&mut self, other: InsertReport) {
        self.accepted += other.accepted;
        self.rejected_as_duplicate += other.rejected_as_duplicate;
        self.rejected_invalid.extend(other.rejected_invalid);
    }
}

fn validate(row: &NormalizedRow) -> Result<Message, RowError> {
    if row.message_id.is_empty() {
        return Err(RowError::EmptyMessageId);
    }
    if row.repost_id.is_some() && row.reply_id.is_some() {
        return Err(RowError::RepostAndReply);
    }
    let timestamp = Timestamp::new(row.timestamp)
        .ok_or(RowError::NonFiniteTimestamp { value: row.timestamp })?;

    Ok(Message {
        message_id: row.message_id.as_str().into(),
        user_id: row.user_id.as_str().into(),
        username: row.username.as_str().into(),
        repost_id: row.repost_id.as_deref().map(Into::into),
        reply_id: row.reply_id.as_deref().map(Into::into),
        message: row.message.clone(),
        timestamp,
        urls: row.urls.clone(),
    })
}

impl Store {
    /// Validates, deduplicates (by `message_id`, keeping the first
    /// occurrence), and durably indexes a batch of rows. Non-fatal:
    /// malformed rows are skipped and counted, not propagated as an error.
    #[instrument(skip_all, fields(batch_len = rows.len()))]
    pub fn insert_messages(&self, rows: Vec<NormalizedRow>) -> DbResult<InsertReport> {
        self.write_with(|dbtx| {
            let mut messages_t = dbtx.open_table(&tables::messages::TABLE)?;
            let mut idx_repost_t = dbtx.open_table(&tables::idx_repost::TABLE)?;
            let mut idx_fingerprint_t = dbtx.open_table(&tables::idx_fingerprint::TABLE)?;
            let mut idx_bucket_t = dbtx.open_table(&tables::idx_similarity_bucket::TABLE)?;
            let mut idx_reply_t = dbtx.open_table(&tables::idx_reply::TABLE)?;
            let mut idx_url_t = dbtx.open_table(&tables::idx_url::TABLE)?;
            let mut idx_post_t = dbtx.open_table(&tables::idx_post::TABLE)?;

            let mut report = InsertReport::default();

            for row in rows {
                let message_id_for_err = row.message_id.clone();
                let message = match validate(&row) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(target: LOG_TARGET, message_id = %message_id_for_err, error = %e.fmt_compact(), "rejecting malformed row");
                        report.rejected_invalid.push((message_id_for_err, e));
                        continue;
                    }
                };

                if messages_t.get(&message.message_id)?.is_some() {
                    report.rejected_as_duplicate += 1;
                    continue;
                }

                if let Some(repost_id) = &message.repost_id {
                    idx_repost_t.insert(
                        &(repost_id.clone(), message.timestamp, message.message_id.clone()),
                        &(),
                    )?;
                } else {
                    let fp = crate::tokenize::fingerprint(&message.message);
                    idx_fingerprint_t
                        .insert(&(fp, message.timestamp, message.message_id.clone()), &())?;

                    let bucket_tokens = crate::tokenize::tokens(&message.message);
                    let bucket = crate::tokenize::SimilarityMetric::bucket(
                        &crate::tokenize::JaccardMetric,
                        &bucket_tokens,
                    );
                    idx_bucket_t
                        .insert(&(bucket, message.timestamp, message.message_id.clone()), &())?;

                    if let Some(reply_id) = &message.reply_id {
                        idx_reply_t.insert(
                            &(reply_id.clone(), message.timestamp, message.message_id.clone()),
                            &(),
                        )?;
                    }

                    for url in &message.urls {
                        idx_url_t.insert(
                            &(url.clone(), message.timestamp, message.message_id.clone()),
                            &(),
                        )?;
                    }

                    idx_post_t.insert(&(message.timestamp, message.message_id.clone()), &())?;
                }

                messages_t.insert(&message.message_id, &message)?;
                report.accepted += 1;
            }

            Ok(report)
        })
    }
}

impl std::iter::Sum<InsertReport> for InsertReport {
    fn sum<I: Iterator<Item = InsertReport>>(iter: I) -> Self {
        let mut acc = InsertReport::default();
        for r in iter {
            acc.merge(r);
        }
        acc
    }
}
