//! Transactional upsert of fetched records against their stored snapshots.

use std::borrow::Cow;

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    Classification, EventStatus, LabeledRecord, StoredSnapshot, SyncRecord, Verb,
};

use super::detect::{classify, derive_verb};

/// Result of reconciling one record.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub classification: Classification,
    /// Present for every classification except `Unchanged`.
    pub verb: Option<Verb>,
    /// The change to deliver, built from the record as stored.
    pub change: Option<LabeledRecord>,
}

/// Compares records with the store and persists what changed.
#[derive(Clone)]
pub struct Upserter {
    repo: Repository,
}

impl Upserter {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Classify `record` and rewrite its snapshot when it changed.
    ///
    /// Unchanged records cause no write. A storage failure leaves the previous
    /// snapshot intact.
    pub async fn upsert(&self, record: &SyncRecord) -> Result<UpsertOutcome, AppError> {
        self.repo
            .read_modify_write(record.source(), record.id(), |existing| {
                let record = carry_forward(record, existing.as_ref());
                let classification = classify(existing.as_ref(), &record);
                if !classification.is_change() {
                    let outcome = UpsertOutcome {
                        classification,
                        verb: None,
                        change: None,
                    };
                    return (outcome, None);
                }

                let verb = derive_verb(existing.as_ref(), &record);
                let snapshot = StoredSnapshot::capture(&record, existing.as_ref());
                let outcome = UpsertOutcome {
                    classification,
                    verb: Some(verb),
                    change: Some(record.labeled(verb)),
                };
                (outcome, Some(snapshot))
            })
            .await
    }
}

/// Cancelled events may come back with little more than their id and status.
/// Fill the blanks from the last stored snapshot so neither the change note nor
/// the new snapshot loses the title and time range.
fn carry_forward<'a>(
    record: &'a SyncRecord,
    existing: Option<&StoredSnapshot>,
) -> Cow<'a, SyncRecord> {
    let (SyncRecord::Event(event), Some(StoredSnapshot::Event(old))) = (record, existing) else {
        return Cow::Borrowed(record);
    };
    if event.status != EventStatus::Cancelled {
        return Cow::Borrowed(record);
    }

    let mut event = event.clone();
    if event.title.is_empty() {
        event.title = old.title.clone();
    }
    if event.location.is_empty() {
        event.location = old.location.clone();
    }
    if event.start.is_none() {
        event.start = old.start;
    }
    if event.end.is_none() {
        event.end = old.end;
    }
    Cow::Owned(SyncRecord::Event(event))
}
