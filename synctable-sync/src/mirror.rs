//! Local table mirror.
//!
//! An ordered, in-memory copy of a remote query result. Records are keyed by
//! the table's primary-key tuple and the mirror never holds two records with
//! the same tuple. Every change that alters data bumps `version`; no-ops
//! (re-applied events, deletes of absent records) leave it alone, which
//! makes applying the same event twice equivalent to applying it once.

use std::sync::Arc;

use synctable_core::{
    merge_record, ChangeEvent, PrimaryKey, Record, TableSchema, ValidationError,
};

/// What an applied change did to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorChange {
    Inserted,
    Updated,
    Deleted,
    Unchanged,
}

impl MirrorChange {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, MirrorChange::Unchanged)
    }
}

#[derive(Debug, Clone)]
pub struct TableMirror {
    schema: Arc<TableSchema>,
    // `keys[i]` is the primary key of `records[i]`.
    keys: Vec<PrimaryKey>,
    records: Vec<Record>,
    version: u64,
}

impl TableMirror {
    /// Empty mirror for `schema`.
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            keys: Vec::new(),
            records: Vec::new(),
            version: 0,
        }
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, key: &PrimaryKey) -> Option<&Record> {
        self.position(key).map(|i| &self.records[i])
    }

    fn position(&self, key: &PrimaryKey) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// Replace the whole contents with an initial result.
    ///
    /// Rows repeating an earlier primary key are merged into it. If any row
    /// lacks a valid primary key the mirror is left untouched.
    pub fn replace(&mut self, records: Vec<Record>) -> Result<(), ValidationError> {
        let mut keys: Vec<PrimaryKey> = Vec::with_capacity(records.len());
        let mut rows: Vec<Record> = Vec::with_capacity(records.len());
        for record in records {
            let key = self.schema.primary_key_of(&record)?;
            match keys.iter().position(|k| *k == key) {
                Some(i) => {
                    merge_record(&mut rows[i], &record);
                }
                None => {
                    keys.push(key);
                    rows.push(record);
                }
            }
        }
        self.keys = keys;
        self.records = rows;
        self.version += 1;
        Ok(())
    }

    /// Apply one changefeed event.
    pub fn apply_change(&mut self, event: &ChangeEvent) -> Result<MirrorChange, ValidationError> {
        let key = self.schema.primary_key_of(event.record())?;
        let change = match event {
            ChangeEvent::Upsert(new_val) => match self.position(&key) {
                Some(i) => {
                    if merge_record(&mut self.records[i], new_val) {
                        MirrorChange::Updated
                    } else {
                        MirrorChange::Unchanged
                    }
                }
                None => {
                    self.keys.push(key);
                    self.records.push(new_val.clone());
                    MirrorChange::Inserted
                }
            },
            ChangeEvent::Delete(_) => match self.position(&key) {
                Some(i) => {
                    self.keys.remove(i);
                    self.records.remove(i);
                    MirrorChange::Deleted
                }
                None => MirrorChange::Unchanged,
            },
        };
        if change.is_mutation() {
            self.version += 1;
        }
        Ok(change)
    }

    /// Drop all records. The version still moves forward.
    pub fn clear(&mut self) {
        if !self.records.is_empty() {
            self.keys.clear();
            self.records.clear();
            self.version += 1;
        }
    }
}
