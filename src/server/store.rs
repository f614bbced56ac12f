//! Change log storage
//!
//! Each server keeps an append-only sequence of change records keyed by
//! version, plus the small [`ServerState`] describing where the server
//! stands. Records and state are always written together so a crash never
//! separates them.
//!
//! Persisted values are framed as `[BINCODE BODY][CRC32]`.

use crate::common::{Error, Result};
use crate::protocol::{ChangeRecord, ChangeRequestState, NomadChange, NomadMode};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Persisted position of one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ServerState<C: NomadChange> {
    pub mode: NomadMode,
    pub mutative_message_count: u64,
    pub last_mutation_host: Option<String>,
    pub last_mutation_user: Option<String>,
    pub last_mutation_timestamp: Option<DateTime<Utc>>,
    /// Version of the last committed change (0 = nothing committed)
    pub current_version: u64,
    /// Highest version ever prepared
    pub highest_version: u64,
    /// Most recent record in the log, whatever its state
    pub latest_change_id: Option<Uuid>,
    pub current_config: Option<C::State>,
}

impl<C: NomadChange> Default for ServerState<C> {
    fn default() -> Self {
        Self {
            mode: NomadMode::Accepting,
            mutative_message_count: 0,
            last_mutation_host: None,
            last_mutation_user: None,
            last_mutation_timestamp: None,
            current_version: 0,
            highest_version: 0,
            latest_change_id: None,
            current_config: None,
        }
    }
}

/// Trait for change log backends
pub trait ChangeStore<C: NomadChange>: Send {
    fn load_state(&self) -> Result<Option<ServerState<C>>>;

    /// Persist state alone (takeover, rejected-but-processed messages)
    fn save_state(&mut self, state: &ServerState<C>) -> Result<()>;

    /// Append a new record together with the state it produces
    fn append(&mut self, record: &ChangeRecord<C>, state: &ServerState<C>) -> Result<()>;

    /// Move a prepared record to its terminal state together with the new state
    fn update(&mut self, record: &ChangeRecord<C>, state: &ServerState<C>) -> Result<()>;

    fn get_by_version(&self, version: u64) -> Result<Option<ChangeRecord<C>>>;

    fn get_by_change_id(&self, change_id: Uuid) -> Result<Option<ChangeRecord<C>>>;

    /// Records with a version strictly greater than `version`, in version order
    fn changes_since(&self, version: u64) -> Result<Vec<ChangeRecord<C>>>;

    fn history(&self) -> Result<Vec<ChangeRecord<C>>> {
        self.changes_since(0)
    }
}

/// Append must extend the log with a fresh prepared record.
pub(crate) fn check_append<C: NomadChange>(
    last_version: Option<u64>,
    record: &ChangeRecord<C>,
) -> Result<()> {
    if record.state != ChangeRequestState::Prepared {
        return Err(Error::Internal(format!(
            "change {} appended in state {}",
            record.change_id, record.state
        )));
    }
    if let Some(last) = last_version {
        if record.version <= last {
            return Err(Error::Internal(format!(
                "change {} has version {} but log is already at {}",
                record.change_id, record.version, last
            )));
        }
    }
    Ok(())
}

/// Only a prepared record may change, and only into a terminal state.
pub(crate) fn check_update<C: NomadChange>(
    existing: Option<&ChangeRecord<C>>,
    record: &ChangeRecord<C>,
) -> Result<()> {
    let existing =
        existing.ok_or_else(|| Error::ChangeNotFound(record.change_id.to_string()))?;
    if existing.state.is_terminal() {
        return Err(Error::Internal(format!(
            "change {} is already {}",
            existing.change_id, existing.state
        )));
    }
    if !record.state.is_terminal() || existing.version != record.version {
        return Err(Error::Internal(format!(
            "invalid transition for change {}: {} v{} -> {} v{}",
            record.change_id, existing.state, existing.version, record.state, record.version
        )));
    }
    Ok(())
}

/// Serialize and append a CRC32 trailer
pub(crate) fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut body = bincode::serialize(value)?;
    let checksum = crc32fast::hash(&body);
    body.extend_from_slice(&checksum.to_le_bytes());
    Ok(body)
}

/// Verify the CRC32 trailer and deserialize
pub(crate) fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < 4 {
        return Err(Error::Corrupted(format!(
            "frame of {} bytes is shorter than its checksum",
            bytes.len()
        )));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 4);
    let mut stored = [0u8; 4];
    stored.copy_from_slice(trailer);
    let expected = u32::from_le_bytes(stored);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(Error::ChecksumMismatch { expected, actual });
    }
    Ok(bincode::deserialize(body)?)
}

/// In-memory store (tests, `--storage memory`)
pub struct MemoryChangeStore<C: NomadChange> {
    records: BTreeMap<u64, ChangeRecord<C>>,
    by_change_id: HashMap<Uuid, u64>,
    state: Option<ServerState<C>>,
}

impl<C: NomadChange> MemoryChangeStore<C> {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            by_change_id: HashMap::new(),
            state: None,
        }
    }
}

impl<C: NomadChange> Default for MemoryChangeStore<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: NomadChange> ChangeStore<C> for MemoryChangeStore<C> {
    fn load_state(&self) -> Result<Option<ServerState<C>>> {
        Ok(self.state.clone())
    }

    fn save_state(&mut self, state: &ServerState<C>) -> Result<()> {
        self.state = Some(state.clone());
        Ok(())
    }

    fn append(&mut self, record: &ChangeRecord<C>, state: &ServerState<C>) -> Result<()> {
        check_append(self.records.keys().next_back().copied(), record)?;
        self.by_change_id.insert(record.change_id, record.version);
        self.records.insert(record.version, record.clone());
        self.state = Some(state.clone());
        Ok(())
    }

    fn update(&mut self, record: &ChangeRecord<C>, state: &ServerState<C>) -> Result<()> {
        let existing = self
            .by_change_id
            .get(&record.change_id)
            .and_then(|version| self.records.get(version));
        check_update(existing, record)?;
        self.records.insert(record.version, record.clone());
        self.state = Some(state.clone());
        Ok(())
    }

    fn get_by_version(&self, version: u64) -> Result<Option<ChangeRecord<C>>> {
        Ok(self.records.get(&version).cloned())
    }

    fn get_by_change_id(&self, change_id: Uuid) -> Result<Option<ChangeRecord<C>>> {
        Ok(self
            .by_change_id
            .get(&change_id)
            .and_then(|version| self.records.get(version))
            .cloned())
    }

    fn changes_since(&self, version: u64) -> Result<Vec<ChangeRecord<C>>> {
        Ok(self
            .records
            .range(version.saturating_add(1)..)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ClusterConfig, ConfigChange};

    fn record(version: u64, state: ChangeRequestState) -> ChangeRecord<ConfigChange> {
        ChangeRecord {
            change_id: Uuid::new_v4(),
            version,
            previous_change_id: None,
            state,
            payload: ConfigChange::SetSetting {
                name: "client-reconnect-window".into(),
                value: format!("{}s", version),
            },
            result: None,
            creation_host: "host-a".into(),
            creation_user: "ops".into(),
            creation_timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_frame_roundtrip_and_corruption() {
        let state: ServerState<ConfigChange> = ServerState {
            mutative_message_count: 3,
            current_config: Some(ClusterConfig::default()),
            ..Default::default()
        };
        let mut bytes = encode_frame(&state).unwrap();
        let decoded: ServerState<ConfigChange> = decode_frame(&bytes).unwrap();
        assert_eq!(decoded, state);

        bytes[0] ^= 0xff;
        match decode_frame::<ServerState<ConfigChange>>(&bytes) {
            Err(Error::ChecksumMismatch { .. }) => {}
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
        assert!(matches!(
            decode_frame::<ServerState<ConfigChange>>(&[1, 2]),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn test_memory_store_lookup_and_range() {
        let mut store = MemoryChangeStore::<ConfigChange>::new();
        let state = ServerState::default();
        let mut ids = Vec::new();
        for version in 1..=4 {
            let r = record(version, ChangeRequestState::Prepared);
            ids.push(r.change_id);
            store.append(&r, &state).unwrap();
        }

        assert_eq!(store.get_by_change_id(ids[2]).unwrap().unwrap().version, 3);
        assert!(store.get_by_change_id(Uuid::new_v4()).unwrap().is_none());
        let since: Vec<u64> = store
            .changes_since(2)
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(since, vec![3, 4]);
        assert_eq!(store.history().unwrap().len(), 4);
        assert!(store.changes_since(u64::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_rejects_out_of_order_append() {
        let mut store = MemoryChangeStore::<ConfigChange>::new();
        let state = ServerState::default();
        store
            .append(&record(2, ChangeRequestState::Prepared), &state)
            .unwrap();
        assert!(store
            .append(&record(2, ChangeRequestState::Prepared), &state)
            .is_err());
        assert!(store
            .append(&record(3, ChangeRequestState::Committed), &state)
            .is_err());
    }

    #[test]
    fn test_terminal_records_are_immutable() {
        let mut store = MemoryChangeStore::<ConfigChange>::new();
        let state = ServerState::default();
        let mut r = record(1, ChangeRequestState::Prepared);
        store.append(&r, &state).unwrap();

        r.state = ChangeRequestState::Committed;
        store.update(&r, &state).unwrap();

        r.state = ChangeRequestState::RolledBack;
        assert!(store.update(&r, &state).is_err());
        assert_eq!(
            store.get_by_version(1).unwrap().unwrap().state,
            ChangeRequestState::Committed
        );
    }
}
