//! The Normalized Store (§4.1): a durable, indexed on-disk corpus backed by
//! `redb` through the typed `redb_bincode` wrapper.

mod insert_ops;
mod network_ops;
mod query_ops;
pub mod tables;

use std::path::Path;

pub use insert_ops::InsertReport;
pub use network_ops::NetworkTableDef;
pub use query_ops::{ActionKey, ActionKeySelector};
use redb_bincode::{ReadTransaction, WriteTransaction};
use snafu::{Location, ResultExt, Snafu};
pub use tables::ResolvedUrlRecord;
use tracing::debug;

const LOG_TARGET: &str = "coord::store";

const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Snafu)]
pub enum DbError {
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        source: redb::TransactionError,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    DbVersionTooHigh {
        db_ver: u64,
        code_ver: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Unknown network table `{name}`"))]
    UnknownNetwork { name: String },
}

pub type DbResult<T> = std::result::Result<T, DbError>;

#[derive(Debug)]
pub struct Store {
    inner: redb_bincode::Database,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> DbResult<Store> {
        let path = path.as_ref();
        debug!(target: LOG_TARGET, path = %path.display(), "opening corpus store");
        let inner = redb::Database::create(path).context(DatabaseSnafu)?;
        Self::open_inner(inner)
    }

    pub fn open_in_memory() -> DbResult<Store> {
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(DatabaseSnafu)?;
        Self::open_inner(inner)
    }

    fn open_inner(inner: redb::Database) -> DbResult<Store> {
        let inner = redb_bincode::Database::from(inner);
        let store = Store { inner };
        store.write_with(Self::init_tables_tx)?;
        Ok(store)
    }

    fn init_tables_tx(dbtx: &WriteTransaction) -> DbResult<()> {
        dbtx.open_table(&tables::schema_version::TABLE)?;
        dbtx.open_table(&tables::messages::TABLE)?;
        dbtx.open_table(&tables::idx_repost::TABLE)?;
        dbtx.open_table(&tables::idx_fingerprint::TABLE)?;
        dbtx.open_table(&tables::idx_similarity_bucket::TABLE)?;
        dbtx.open_table(&tables::idx_reply::TABLE)?;
        dbtx.open_table(&tables::idx_url::TABLE)?;
        dbtx.open_table(&tables::idx_post::TABLE)?;
        dbtx.open_table(&tables::resolved_url::TABLE)?;
        dbtx.open_table(&tables::network_co_retweet::TABLE)?;
        dbtx.open_table(&tables::network_co_tweet::TABLE)?;
        dbtx.open_table(&tables::network_co_similar_tweet::TABLE)?;
        dbtx.open_table(&tables::network_co_link::TABLE)?;
        dbtx.open_table(&tables::network_co_reply::TABLE)?;
        dbtx.open_table(&tables::network_co_post::TABLE)?;

        let mut ver_t = dbtx.open_table(&tables::schema_version::TABLE)?;
        match ver_t.get(&())?.map(|g| g.value()) {
            None => {
                ver_t.insert(&(), &SCHEMA_VERSION)?;
            }
            Some(ver) if ver > SCHEMA_VERSION => {
                return DbVersionTooHighSnafu {
                    db_ver: ver,
                    code_ver: SCHEMA_VERSION,
                }
                .fail();
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub fn write_with<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        let dbtx = self.inner.begin_write().context(TransactionSnafu)?;
        let res = f(&dbtx)?;
        dbtx.commit().context(CommitSnafu)?;
        Ok(res)
    }

    pub fn read_with<T>(&self, f: impl FnOnce(&ReadTransaction) -> DbResult<T>) -> DbResult<T> {
        let mut dbtx = self.inner.begin_read().context(TransactionSnafu)?;
        f(&mut dbtx)
    }

    /// Dumps a table's contents as JSON lines, for debugging (mirrors the
    /// upstream `dump_table_dbtx` helper).
    pub fn dump_table<K, V>(
        &self,
        def: &redb_bincode::TableDefinition<'_, K, V>,
    ) -> DbResult<Vec<String>>
    where
        K: bincode::Decode<()> + bincode::Encode + serde::Serialize,
        V: bincode::Decode<()> + bincode::Encode + serde::Serialize,
    {
        self.read_with(|dbtx| {
            let tbl = dbtx.open_table(def)?;
            let mut out = vec![];
            for record in tbl.range(..)? {
                let (k, v) = record?;
                out.push(format!(
                    "{} => {}",
                    serde_json::to_string(&k.value()).expect("serialize key"),
                    serde_json::to_string(&v.value()).expect("serialize value"),
                ));
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests;
