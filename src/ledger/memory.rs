use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    ops::Bound,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{
    BufferedIter, HistoryIter, Key, KeyModification, KeyValue, LedgerContext, LedgerError,
    RangeIter, TxId,
};

/// In-process ledger host: latest world state plus append-only history.
///
/// Writes land immediately, so every `put_state` is durable on its own and
/// the last write to a key wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryLedger {
    state: BTreeMap<Key, Vec<u8>>,
    history: BTreeMap<Key, Vec<KeyModification>>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    state: BTreeMap<Key, StoredValue>,
    history: BTreeMap<Key, Vec<KeyModification>>,
}

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
struct StoredValue(#[serde(with = "crate::ledger::serde_base64")] Vec<u8>);

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction context with a fresh id and the current time.
    pub fn begin(&mut self) -> Transaction<'_> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.begin_at(timestamp)
    }

    pub fn begin_at(&mut self, timestamp: u64) -> Transaction<'_> {
        Transaction {
            tx_id: new_tx_id(timestamp),
            timestamp,
            ledger: self,
        }
    }

    /// Number of keys in the world state.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Total number of writes ever applied.
    pub fn revision(&self) -> usize {
        self.history.values().map(Vec::len).sum()
    }

    /// Load a snapshot written by [`MemoryLedger::save`]. A missing file is
    /// an empty ledger.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => return Err(err.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(Self {
            state: snapshot
                .state
                .into_iter()
                .map(|(key, StoredValue(value))| (key, value))
                .collect(),
            history: snapshot.history,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let snapshot = Snapshot {
            state: self
                .state
                .iter()
                .map(|(key, value)| (key.clone(), StoredValue(value.clone())))
                .collect(),
            history: self.history.clone(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, json)?;
        Ok(())
    }

    fn write(&mut self, key: &str, value: Vec<u8>, tx_id: &str, timestamp: u64) {
        self.history
            .entry(key.to_string())
            .or_default()
            .push(KeyModification {
                tx_id: tx_id.to_string(),
                value: value.clone(),
                timestamp,
            });
        self.state.insert(key.to_string(), value);
    }
}

fn new_tx_id(timestamp: u64) -> TxId {
    let mut nonce = [0u8; 24];
    OsRng.fill_bytes(&mut nonce);
    let mut hasher = Sha256::new();
    hasher.update(b"loan-ledger-tx");
    hasher.update(nonce);
    hasher.update(timestamp.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// One transaction's view of a [`MemoryLedger`].
pub struct Transaction<'a> {
    ledger: &'a mut MemoryLedger,
    tx_id: TxId,
    timestamp: u64,
}

impl LedgerContext for Transaction<'_> {
    fn tx_id(&self) -> &str {
        &self.tx_id
    }

    fn tx_timestamp(&self) -> u64 {
        self.timestamp
    }

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), LedgerError> {
        if key.is_empty() {
            return Err(LedgerError::EmptyKey);
        }
        self.ledger.write(key, value, &self.tx_id, self.timestamp);
        Ok(())
    }

    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        if key.is_empty() {
            return Err(LedgerError::EmptyKey);
        }
        Ok(self.ledger.state.get(key).cloned())
    }

    fn get_state_by_range(
        &self,
        start_key: &str,
        end_key: &str,
    ) -> Result<RangeIter<'_>, LedgerError> {
        if !start_key.is_empty() && !end_key.is_empty() && start_key >= end_key {
            return Ok(Box::new(BufferedIter::new(Vec::new())));
        }
        let lower = match start_key {
            "" => Bound::Unbounded,
            key => Bound::Included(key),
        };
        let upper = match end_key {
            "" => Bound::Unbounded,
            key => Bound::Excluded(key),
        };
        let entries: Vec<KeyValue> = self
            .ledger
            .state
            .range::<str, _>((lower, upper))
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        Ok(Box::new(BufferedIter::new(entries)))
    }

    fn get_history_for_key(&self, key: &str) -> Result<HistoryIter<'_>, LedgerError> {
        if key.is_empty() {
            return Err(LedgerError::EmptyKey);
        }
        let entries = self.ledger.history.get(key).cloned().unwrap_or_default();
        Ok(Box::new(BufferedIter::new(entries)))
    }
}
