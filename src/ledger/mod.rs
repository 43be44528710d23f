//! Ledger context capability consumed by the proposal contract.
//!
//! The contract never owns storage. Every operation receives a
//! [`LedgerContext`] for the current transaction and goes through it for
//! world-state reads, writes, range scans and per-key history. Durability,
//! ordering and conflict resolution belong to whoever implements the trait;
//! [`MemoryLedger`] is the in-process host used by the binaries and tests.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

mod memory;

pub use memory::{MemoryLedger, Transaction};

pub type Key = String;
pub type TxId = String;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("empty key is not allowed")]
    EmptyKey,
    #[error("iterator has no more results")]
    IteratorExhausted,
    #[error("iterator is closed")]
    IteratorClosed,
    #[error("ledger backend failure: {0}")]
    Backend(String),
    #[error("snapshot i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot format: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// A world-state entry produced by a range scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Key,
    pub value: Vec<u8>,
}

/// One historical write to a key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyModification {
    pub tx_id: TxId,
    #[serde(with = "crate::ledger::serde_base64")]
    pub value: Vec<u8>,
    /// Seconds since the unix epoch, as stamped by the writing transaction.
    pub timestamp: u64,
}

/// Cursor over host-produced results.
///
/// Mirrors the host shim: callers poll `has_next`, pull with `next` and must
/// `close` the cursor when done. Use [`Scoped`] to get the close for free.
pub trait StateIterator {
    type Item;

    fn has_next(&self) -> bool;

    fn next(&mut self) -> Result<Self::Item, LedgerError>;

    fn close(&mut self) -> Result<(), LedgerError>;
}

impl<I: StateIterator + ?Sized> StateIterator for Box<I> {
    type Item = I::Item;

    fn has_next(&self) -> bool {
        (**self).has_next()
    }

    fn next(&mut self) -> Result<Self::Item, LedgerError> {
        (**self).next()
    }

    fn close(&mut self) -> Result<(), LedgerError> {
        (**self).close()
    }
}

pub type RangeIter<'a> = Box<dyn StateIterator<Item = KeyValue> + 'a>;
pub type HistoryIter<'a> = Box<dyn StateIterator<Item = KeyModification> + 'a>;

/// Capability handed to the contract for the duration of one transaction.
pub trait LedgerContext {
    /// Identifier of the transaction this context belongs to.
    fn tx_id(&self) -> &str;

    /// Transaction timestamp in seconds since the unix epoch.
    fn tx_timestamp(&self) -> u64;

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), LedgerError>;

    /// `Ok(None)` when nothing is stored under `key`.
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;

    /// Scan `[start_key, end_key)` in key order. An empty bound is open-ended.
    fn get_state_by_range(&self, start_key: &str, end_key: &str)
        -> Result<RangeIter<'_>, LedgerError>;

    /// All values ever written to `key`, oldest first.
    fn get_history_for_key(&self, key: &str) -> Result<HistoryIter<'_>, LedgerError>;
}

/// Guard that closes the wrapped cursor on every exit path.
///
/// Iterating yields `Result`s; an early return out of the loop drops the
/// guard and closes the cursor. [`Scoped::finish`] closes explicitly and
/// reports a failing close.
pub struct Scoped<I: StateIterator> {
    inner: I,
    closed: bool,
}

impl<I: StateIterator> Scoped<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    pub fn finish(mut self) -> Result<(), LedgerError> {
        self.closed = true;
        self.inner.close()
    }
}

impl<I: StateIterator> Iterator for Scoped<I> {
    type Item = Result<I::Item, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed || !self.inner.has_next() {
            return None;
        }
        Some(self.inner.next())
    }
}

impl<I: StateIterator> Drop for Scoped<I> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.inner.close();
        }
    }
}

/// Cursor over results materialized up front.
#[derive(Debug)]
pub struct BufferedIter<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> BufferedIter<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
            closed: false,
        }
    }
}

impl<T> StateIterator for BufferedIter<T> {
    type Item = T;

    fn has_next(&self) -> bool {
        !self.closed && !self.items.is_empty()
    }

    fn next(&mut self) -> Result<T, LedgerError> {
        if self.closed {
            return Err(LedgerError::IteratorClosed);
        }
        self.items.pop_front().ok_or(LedgerError::IteratorExhausted)
    }

    fn close(&mut self) -> Result<(), LedgerError> {
        self.closed = true;
        self.items.clear();
        Ok(())
    }
}

pub(crate) mod serde_base64 {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&general_purpose::STANDARD.encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;

    struct Counting {
        inner: BufferedIter<u32>,
        closes: Rc<Cell<u32>>,
    }

    impl StateIterator for Counting {
        type Item = u32;

        fn has_next(&self) -> bool {
            self.inner.has_next()
        }

        fn next(&mut self) -> Result<u32, LedgerError> {
            self.inner.next()
        }

        fn close(&mut self) -> Result<(), LedgerError> {
            self.closes.set(self.closes.get() + 1);
            self.inner.close()
        }
    }

    fn counting(items: Vec<u32>) -> (Counting, Rc<Cell<u32>>) {
        let closes = Rc::new(Cell::new(0));
        let iter = Counting {
            inner: BufferedIter::new(items),
            closes: closes.clone(),
        };
        (iter, closes)
    }

    #[test]
    fn buffered_iter_reports_exhaustion_and_close() {
        let mut iter = BufferedIter::new(vec![1, 2]);
        assert!(iter.has_next());
        assert_eq!(iter.next().unwrap(), 1);
        assert_eq!(iter.next().unwrap(), 2);
        assert!(!iter.has_next());
        assert!(matches!(iter.next(), Err(LedgerError::IteratorExhausted)));

        let mut iter = BufferedIter::new(vec![1]);
        iter.close().unwrap();
        assert!(!iter.has_next());
        assert!(matches!(iter.next(), Err(LedgerError::IteratorClosed)));
    }

    #[test]
    fn scoped_closes_exactly_once_when_finished() {
        let (iter, closes) = counting(vec![1, 2, 3]);
        let mut cursor = Scoped::new(iter);
        let items: Vec<u32> = cursor.by_ref().map(|item| item.unwrap()).collect();
        cursor.finish().unwrap();
        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn scoped_closes_on_early_drop() {
        let (iter, closes) = counting(vec![1, 2, 3]);
        {
            let mut cursor = Scoped::new(iter);
            assert_eq!(cursor.next().unwrap().unwrap(), 1);
        }
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn key_modification_encodes_value_as_base64() {
        let entry = KeyModification {
            tx_id: "abc".into(),
            value: b"{\"a\":1}".to_vec(),
            timestamp: 7,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["value"], "eyJhIjoxfQ==");
        let back: KeyModification = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
