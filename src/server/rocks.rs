//! Change log store using RocksDB
//!
//! Column families:
//! - `changes`: big-endian version → record, so iteration follows version order
//! - `change_ids`: change id → big-endian version
//! - `state`: the server's persisted position

use crate::common::{Error, Result};
use crate::protocol::{ChangeRecord, NomadChange};
use crate::server::store::{check_append, check_update, decode_frame, encode_frame};
use crate::server::store::{ChangeStore, ServerState};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::marker::PhantomData;
use std::path::Path;
use uuid::Uuid;

const CF_CHANGES: &str = "changes";
const CF_CHANGE_IDS: &str = "change_ids";
const CF_STATE: &str = "state";
const STATE_KEY: &[u8] = b"server";

pub struct RocksChangeStore<C: NomadChange> {
    db: DB,
    _change: PhantomData<fn() -> C>,
}

impl<C: NomadChange> RocksChangeStore<C> {
    /// Open or create a change log
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_CHANGES, CF_CHANGE_IDS, CF_STATE])?;

        Ok(Self {
            db,
            _change: PhantomData,
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Internal(format!("missing column family {}", name)))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    fn last_version(&self) -> Result<Option<u64>> {
        let cf = self.cf(CF_CHANGES)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Some(decode_version(&key)?))
            }
            None => Ok(None),
        }
    }

    fn batch_record(
        &self,
        batch: &mut WriteBatch,
        record: &ChangeRecord<C>,
        state: &ServerState<C>,
    ) -> Result<()> {
        let key = record.version.to_be_bytes();
        batch.put_cf(self.cf(CF_CHANGES)?, key, encode_frame(record)?);
        batch.put_cf(self.cf(CF_CHANGE_IDS)?, record.change_id.as_bytes(), key);
        batch.put_cf(self.cf(CF_STATE)?, STATE_KEY, encode_frame(state)?);
        Ok(())
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_version(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| Error::Corrupted(format!("change key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

impl<C: NomadChange> ChangeStore<C> for RocksChangeStore<C> {
    fn load_state(&self) -> Result<Option<ServerState<C>>> {
        match self.db.get_cf(self.cf(CF_STATE)?, STATE_KEY)? {
            Some(bytes) => Ok(Some(decode_frame(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_state(&mut self, state: &ServerState<C>) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_STATE)?, STATE_KEY, encode_frame(state)?);
        self.write(batch)
    }

    fn append(&mut self, record: &ChangeRecord<C>, state: &ServerState<C>) -> Result<()> {
        check_append(self.last_version()?, record)?;
        let mut batch = WriteBatch::default();
        self.batch_record(&mut batch, record, state)?;
        self.write(batch)
    }

    fn update(&mut self, record: &ChangeRecord<C>, state: &ServerState<C>) -> Result<()> {
        let existing = self.get_by_change_id(record.change_id)?;
        check_update(existing.as_ref(), record)?;
        let mut batch = WriteBatch::default();
        self.batch_record(&mut batch, record, state)?;
        self.write(batch)
    }

    fn get_by_version(&self, version: u64) -> Result<Option<ChangeRecord<C>>> {
        match self.db.get_cf(self.cf(CF_CHANGES)?, version.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode_frame(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_by_change_id(&self, change_id: Uuid) -> Result<Option<ChangeRecord<C>>> {
        match self.db.get_cf(self.cf(CF_CHANGE_IDS)?, change_id.as_bytes())? {
            Some(key) => self.get_by_version(decode_version(&key)?),
            None => Ok(None),
        }
    }

    fn changes_since(&self, version: u64) -> Result<Vec<ChangeRecord<C>>> {
        let Some(start) = version.checked_add(1) else {
            return Ok(Vec::new());
        };
        let start_key = start.to_be_bytes();
        let cf = self.cf(CF_CHANGES)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (_, value) = item?;
            records.push(decode_frame(&value)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChangeRequestState, NomadMode};
    use crate::settings::ConfigChange;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(version: u64) -> ChangeRecord<ConfigChange> {
        ChangeRecord {
            change_id: Uuid::new_v4(),
            version,
            previous_change_id: None,
            state: ChangeRequestState::Prepared,
            payload: ConfigChange::UnsetSetting {
                name: format!("setting-{}", version),
            },
            result: None,
            creation_host: "host-a".into(),
            creation_user: "ops".into(),
            creation_timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_rocks_store_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changes.db");
        let first = record(1);

        {
            let mut store = RocksChangeStore::<ConfigChange>::open(&path).unwrap();
            assert!(store.load_state().unwrap().is_none());

            let state = ServerState {
                mode: NomadMode::Prepared,
                mutative_message_count: 1,
                highest_version: 1,
                latest_change_id: Some(first.change_id),
                ..Default::default()
            };
            store.append(&first, &state).unwrap();
            store.flush().unwrap();
        }

        let store = RocksChangeStore::<ConfigChange>::open(&path).unwrap();
        let state = store.load_state().unwrap().unwrap();
        assert_eq!(state.mode, NomadMode::Prepared);
        assert_eq!(state.mutative_message_count, 1);
        let reloaded = store.get_by_change_id(first.change_id).unwrap().unwrap();
        assert_eq!(reloaded, first);
    }

    #[test]
    fn test_rocks_store_range_scan_in_version_order() {
        let dir = tempdir().unwrap();
        let mut store = RocksChangeStore::<ConfigChange>::open(dir.path().join("db")).unwrap();
        let state = ServerState::default();
        // Versions above 255 check that keys sort numerically
        for version in [1u64, 2, 300, 301] {
            store.append(&record(version), &state).unwrap();
        }

        let versions: Vec<u64> = store
            .changes_since(2)
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![300, 301]);
        assert_eq!(store.history().unwrap().len(), 4);
        assert!(store.append(&record(5), &state).is_err());
    }

    #[test]
    fn test_rocks_store_update_is_terminal_once() {
        let dir = tempdir().unwrap();
        let mut store = RocksChangeStore::<ConfigChange>::open(dir.path().join("db")).unwrap();
        let state = ServerState::default();
        let mut r = record(1);
        store.append(&r, &state).unwrap();

        r.state = ChangeRequestState::RolledBack;
        store.update(&r, &state).unwrap();
        r.state = ChangeRequestState::Committed;
        assert!(store.update(&r, &state).is_err());
        assert_eq!(
            store.get_by_version(1).unwrap().unwrap().state,
            ChangeRequestState::RolledBack
        );
    }
}
