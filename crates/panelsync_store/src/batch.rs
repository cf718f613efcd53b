//! Write batches and their application.
//!
//! Mutations are conditional and evaluated against the state at commit
//! time, the way an `UPDATE ... WHERE` is evaluated by a relational store.
//! A batch is applied to a copy of the records and swapped in only if every
//! mutation succeeds.

use crate::error::{StoreError, StoreResult};
use chrono::NaiveDateTime;
use panelsync_protocol::{ParentFields, UserRecord};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single change to the user table.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Inserts a new record. Fails if the uuid exists.
    Insert(UserRecord),
    /// Overwrites every parent-owned field, leaving child-owned fields.
    ReplaceFields {
        /// Target user.
        uuid: Uuid,
        /// New parent-owned values.
        fields: ParentFields,
    },
    /// Sets `enable = false`.
    Disable {
        /// Target user.
        uuid: Uuid,
    },
    /// Subtracts confirmed bytes from `current_usage`, saturating at zero,
    /// and advances `reset_epoch`.
    ///
    /// Applies only while the record is still at `epoch`, so a deduction
    /// that was already committed is a no-op when replayed. A missing user
    /// is a no-op.
    DeductUsage {
        /// Target user.
        uuid: Uuid,
        /// Bytes confirmed by the parent.
        bytes: u64,
        /// `reset_epoch` of the record when the bytes were collected.
        epoch: u64,
    },
    /// Adds observed traffic and refreshes `last_online`.
    RecordUsage {
        /// Target user.
        uuid: Uuid,
        /// Bytes observed.
        bytes: u64,
        /// Observation time.
        at: NaiveDateTime,
    },
}

/// An ordered set of mutations committed as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mutation.
    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    /// Appends an insert.
    pub fn insert(&mut self, record: UserRecord) {
        self.push(Mutation::Insert(record));
    }

    /// Appends a parent-field overwrite.
    pub fn replace_fields(&mut self, uuid: Uuid, fields: ParentFields) {
        self.push(Mutation::ReplaceFields { uuid, fields });
    }

    /// Appends a soft-block.
    pub fn disable(&mut self, uuid: Uuid) {
        self.push(Mutation::Disable { uuid });
    }

    /// Appends a confirmed usage deduction collected at `epoch`.
    pub fn deduct_usage(&mut self, uuid: Uuid, bytes: u64, epoch: u64) {
        self.push(Mutation::DeductUsage { uuid, bytes, epoch });
    }

    /// Appends observed usage.
    pub fn record_usage(&mut self, uuid: Uuid, bytes: u64, at: NaiveDateTime) {
        self.push(Mutation::RecordUsage { uuid, bytes, at });
    }

    /// Returns the mutations in order.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Returns the number of mutations.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Returns true if the batch holds no mutations.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Applies the batch to `records`, all or nothing.
    ///
    /// On error `records` is left untouched.
    pub(crate) fn apply(
        &self,
        records: &mut BTreeMap<Uuid, UserRecord>,
    ) -> StoreResult<CommitReport> {
        if self.mutations.is_empty() {
            return Ok(CommitReport::default());
        }

        let mut staged = records.clone();
        let mut outcomes = Vec::with_capacity(self.mutations.len());
        for mutation in &self.mutations {
            outcomes.push(apply_one(&mut staged, mutation)?);
        }

        *records = staged;
        Ok(CommitReport { outcomes })
    }
}

/// Applies one mutation, returning whether a row changed.
fn apply_one(records: &mut BTreeMap<Uuid, UserRecord>, mutation: &Mutation) -> StoreResult<bool> {
    match mutation {
        Mutation::Insert(record) => {
            if records.contains_key(&record.uuid) {
                return Err(StoreError::DuplicateUser(record.uuid));
            }
            records.insert(record.uuid, record.clone());
            Ok(true)
        }
        Mutation::ReplaceFields { uuid, fields } => {
            let record = records
                .get_mut(uuid)
                .ok_or(StoreError::UserNotFound(*uuid))?;
            if record.fields == *fields {
                return Ok(false);
            }
            record.fields = fields.clone();
            Ok(true)
        }
        Mutation::Disable { uuid } => {
            let record = records
                .get_mut(uuid)
                .ok_or(StoreError::UserNotFound(*uuid))?;
            if !record.fields.enable {
                return Ok(false);
            }
            record.fields.enable = false;
            Ok(true)
        }
        Mutation::DeductUsage { uuid, bytes, epoch } => match records.get_mut(uuid) {
            Some(record) if record.reset_epoch == *epoch => {
                record.reset_epoch += 1;
                let before = record.current_usage;
                record.current_usage = before.saturating_sub(*bytes);
                Ok(before > 0)
            }
            _ => Ok(false),
        },
        Mutation::RecordUsage { uuid, bytes, at } => {
            let record = records
                .get_mut(uuid)
                .ok_or(StoreError::UserNotFound(*uuid))?;
            record.current_usage = record.current_usage.saturating_add(*bytes);
            record.last_online = Some(*at);
            Ok(true)
        }
    }
}

/// Result of a committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    outcomes: Vec<bool>,
}

impl CommitReport {
    /// Per-mutation flags, in batch order: true if a row changed.
    pub fn outcomes(&self) -> &[bool] {
        &self.outcomes
    }

    /// Number of mutations that changed a row.
    pub fn changed(&self) -> usize {
        self.outcomes.iter().filter(|changed| **changed).count()
    }

    /// Returns true if the mutation at `index` changed a row.
    pub fn changed_at(&self, index: usize) -> bool {
        self.outcomes.get(index).copied().unwrap_or(false)
    }
}
