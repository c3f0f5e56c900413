//! Atomic modifications of the security history.

use backon::{BlockingRetryable, ExponentialBuilder};
use chrono::{DateTime, Duration, Utc};
use secmaster_core::{
    Error, IdentityScheme, Resolution, Result, Security, SecurityDocument, Store, StoreTxn,
    TimeSource, UniqueId, VersionRef, VersionedRecord,
};

use crate::changes::{ChangeEvent, ChangeManager, ChangeType};

/// Runs every modification of the history as one retried transaction
/// followed by a change event.
#[derive(Debug)]
pub struct ModifyWorker<'a> {
    pub(crate) store: &'a mut Store,
    pub(crate) clock: &'a dyn TimeSource,
    pub(crate) scheme: &'a IdentityScheme,
    pub(crate) changes: &'a ChangeManager,
    pub(crate) max_retries: usize,
}

impl ModifyWorker<'_> {
    /// Stores the first version of a new security.
    pub fn add(&mut self, security: &Security) -> Result<SecurityDocument> {
        validate(security)?;
        log::debug!("add {}", security.name);

        let added = self.retrying(|txn, now| {
            let object_id = txn.allocate_object_id(now)?;
            let record = VersionedRecord::open(object_id, 0, 0, security.clone(), now);
            txn.insert(&record)?;
            Ok(record)
        })?;

        let document = self.scheme.document(added);
        self.publish(ChangeType::Added, None, &document, document.version_from_instant);
        Ok(document)
    }

    /// Closes the latest version of the referenced object and stores
    /// `security` as its successor.
    pub fn update(&mut self, unique_id: &UniqueId, security: &Security) -> Result<SecurityDocument> {
        validate(security)?;
        let target = self.scheme.resolve_versioned(unique_id)?;
        log::debug!("update {unique_id}");

        let (previous, next) = self.retrying(|txn, now| {
            let referenced = load_version(txn, target)?;
            let current = txn.find_latest_version(target.object_id)?;
            if current.version_number != referenced.version_number {
                return Err(Error::Conflict(format!(
                    "{unique_id} is not the latest version (latest is {})",
                    current.version_number
                )));
            }
            let version_number = txn.next_version_number(target.object_id)?;
            txn.close_version(target.object_id, now)
                .map_err(|e| lost_race(e, unique_id))?;
            let next = VersionedRecord::open(
                target.object_id,
                version_number,
                0,
                security.clone(),
                now,
            );
            txn.insert(&next)?;
            Ok((current, next))
        })?;

        let before = self.record_id(&previous);
        let document = self.scheme.document(next);
        self.publish(
            ChangeType::Changed,
            Some(before),
            &document,
            document.version_from_instant,
        );
        Ok(document)
    }

    /// Replaces the open correction of the referenced version with
    /// `security`, keeping the version interval.
    pub fn correct(
        &mut self,
        unique_id: &UniqueId,
        security: &Security,
    ) -> Result<SecurityDocument> {
        validate(security)?;
        let target = self.scheme.resolve_versioned(unique_id)?;
        log::debug!("correct {unique_id}");

        let (previous, next) = self.retrying(|txn, now| {
            let current = load_version(txn, target)?;
            correct_row(txn, current, security, now, unique_id)
        })?;
        Ok(self.publish_correction(&previous, next))
    }

    /// Like [`correct`](Self::correct) but also accepts an unversioned id,
    /// which targets the current row.
    pub fn replace_version(
        &mut self,
        unique_id: &UniqueId,
        security: &Security,
    ) -> Result<SecurityDocument> {
        validate(security)?;
        let resolution = self.scheme.resolve(unique_id)?;
        log::debug!("replace version {unique_id}");

        let (previous, next) = self.retrying(|txn, now| {
            let current = load_resolved(txn, resolution)?;
            correct_row(txn, current, security, now, unique_id)
        })?;
        Ok(self.publish_correction(&previous, next))
    }

    /// Closes the latest version without a successor. The history stays
    /// queryable.
    pub fn remove(&mut self, unique_id: &UniqueId) -> Result<SecurityDocument> {
        let resolution = self.scheme.resolve(unique_id)?;
        let object_id = resolution.object_id();
        log::debug!("remove {unique_id}");

        let removed = self.retrying(|txn, now| {
            let mut current = txn.find_latest_version(object_id)?;
            if !matches!(resolution, Resolution::Latest { .. }) {
                let referenced = load_resolved(txn, resolution)?;
                if referenced.version_number != current.version_number {
                    return Err(Error::Conflict(format!(
                        "{unique_id} is not the latest version (latest is {})",
                        current.version_number
                    )));
                }
            }
            txn.close_version(object_id, now)
                .map_err(|e| lost_race(e, unique_id))?;
            current.version_to_instant = Some(now);
            Ok(current)
        })?;

        let document = self.scheme.document(removed);
        let event = ChangeEvent {
            change_type: ChangeType::Removed,
            object_id: document.object_id().clone(),
            before: Some(document.unique_id.clone()),
            after: None,
            version_from: document.version_from_instant,
            version_to: document.version_to_instant,
            instant: document
                .version_to_instant
                .unwrap_or(document.version_from_instant),
        };
        self.changes.publish(&event);
        Ok(document)
    }

    /// Retracts the referenced version as if it had never been recorded.
    ///
    /// The version's open correction is closed. If an earlier version was
    /// valid just before it, that version is corrected to also cover the
    /// retracted interval and its new document is returned. Otherwise the
    /// interval is left uncovered and `None` is returned.
    pub fn remove_version(&mut self, unique_id: &UniqueId) -> Result<Option<SecurityDocument>> {
        let resolution = self.scheme.resolve(unique_id)?;
        log::debug!("remove version {unique_id}");

        let (retracted, extended) = self.retrying(|txn, now| {
            let mut retracted = load_resolved(txn, resolution)?;
            check_open_correction(&retracted, unique_id)?;
            txn.close_correction(retracted.object_id, retracted.version_number, now)
                .map_err(|e| lost_race(e, unique_id))?;
            retracted.correction_to_instant = Some(now);

            let Some(just_before) = retracted
                .version_from_instant
                .checked_sub_signed(Duration::microseconds(1))
            else {
                return Ok((retracted, None));
            };
            let previous = match txn.find_at(retracted.object_id, just_before, now) {
                Ok(previous) => previous,
                Err(err) if err.is_not_found() => return Ok((retracted, None)),
                Err(err) => return Err(err),
            };
            txn.close_correction(previous.object_id, previous.version_number, now)
                .map_err(|e| lost_race(e, unique_id))?;
            let extended = VersionedRecord {
                correction_number: previous.correction_number + 1,
                version_to_instant: retracted.version_to_instant,
                correction_from_instant: now,
                correction_to_instant: None,
                ..previous
            };
            txn.insert(&extended)?;
            Ok((retracted, Some(extended)))
        })?;

        let before = self.record_id(&retracted);
        match extended {
            Some(extended) => {
                let document = self.scheme.document(extended);
                let instant = document.correction_from_instant;
                self.publish(ChangeType::Changed, Some(before), &document, instant);
                Ok(Some(document))
            }
            None => {
                let event = ChangeEvent {
                    change_type: ChangeType::Removed,
                    object_id: before.object_id().clone(),
                    before: Some(before),
                    after: None,
                    version_from: retracted.version_from_instant,
                    version_to: retracted.version_to_instant,
                    instant: retracted
                        .correction_to_instant
                        .unwrap_or(retracted.version_from_instant),
                };
                self.changes.publish(&event);
                Ok(None)
            }
        }
    }

    /// Runs `body` in a write transaction stamped with a fresh `now`,
    /// retrying the whole transaction on lock contention.
    fn retrying<T>(&mut self, body: impl Fn(&StoreTxn<'_>, DateTime<Utc>) -> Result<T>) -> Result<T> {
        let clock = self.clock;
        let store = &mut *self.store;
        (|| {
            let now = clock.now();
            store.write(|txn| body(txn, now))
        })
        .retry(ExponentialBuilder::default().with_max_times(self.max_retries))
        .sleep(std::thread::sleep)
        .when(Error::is_transient)
        .notify(|err, after| log::warn!("retrying in {after:?} after {err}"))
        .call()
    }

    fn record_id(&self, record: &VersionedRecord) -> UniqueId {
        self.scheme.unique_id(
            record.object_id,
            record.version_number,
            record.correction_number,
        )
    }

    fn publish_correction(
        &self,
        previous: &VersionedRecord,
        next: VersionedRecord,
    ) -> SecurityDocument {
        let before = self.record_id(previous);
        let document = self.scheme.document(next);
        let instant = document.correction_from_instant;
        self.publish(ChangeType::Changed, Some(before), &document, instant);
        document
    }

    fn publish(
        &self,
        change_type: ChangeType,
        before: Option<UniqueId>,
        document: &SecurityDocument,
        instant: DateTime<Utc>,
    ) {
        let event = ChangeEvent {
            change_type,
            object_id: document.object_id().clone(),
            before,
            after: Some(document.unique_id.clone()),
            version_from: document.version_from_instant,
            version_to: document.version_to_instant,
            instant,
        };
        self.changes.publish(&event);
    }
}

fn validate(security: &Security) -> Result<()> {
    if security.name.trim().is_empty() {
        return Err(Error::InvalidArgument("security name must not be blank".to_string()));
    }
    if security.security_type.trim().is_empty() {
        return Err(Error::InvalidArgument(format!(
            "security type must not be blank: {}",
            security.name
        )));
    }
    if let Some(id) = security
        .identifiers
        .iter()
        .find(|id| id.scheme.trim().is_empty() || id.value.trim().is_empty())
    {
        return Err(Error::InvalidArgument(format!(
            "identifier must have a scheme and a value: {id}"
        )));
    }
    Ok(())
}

/// The row a versioned id names. Without a correction number that is the
/// open correction of the version.
fn load_version(txn: &StoreTxn<'_>, target: VersionRef) -> Result<VersionedRecord> {
    match target.correction {
        None => txn.find_version(target.object_id, target.version),
        Some(correction) => {
            txn.find_by_unique_id(target.object_id, target.version, correction)
        }
    }
}

fn load_resolved(txn: &StoreTxn<'_>, resolution: Resolution) -> Result<VersionedRecord> {
    match resolution {
        Resolution::Latest { object_id } => txn.find_latest_version(object_id),
        Resolution::Version { object_id, version } => txn.find_version(object_id, version),
        Resolution::Exact {
            object_id,
            version,
            correction,
        } => txn.find_by_unique_id(object_id, version, correction),
    }
}

fn check_open_correction(record: &VersionedRecord, unique_id: &UniqueId) -> Result<()> {
    if record.correction_to_instant.is_some() {
        return Err(Error::Conflict(format!(
            "{unique_id} is not the latest correction"
        )));
    }
    Ok(())
}

/// Supersedes `current`, which must be the open correction of its version,
/// with a new correction carrying `security` over the same version interval.
fn correct_row(
    txn: &StoreTxn<'_>,
    current: VersionedRecord,
    security: &Security,
    now: DateTime<Utc>,
    unique_id: &UniqueId,
) -> Result<(VersionedRecord, VersionedRecord)> {
    check_open_correction(&current, unique_id)?;
    txn.close_correction(current.object_id, current.version_number, now)
        .map_err(|e| lost_race(e, unique_id))?;
    let next = VersionedRecord {
        correction_number: current.correction_number + 1,
        payload: security.clone(),
        correction_from_instant: now,
        correction_to_instant: None,
        ..current.clone()
    };
    txn.insert(&next)?;
    Ok((current, next))
}

/// The guarded close matched nothing although the row was just read as open.
fn lost_race(err: Error, unique_id: &UniqueId) -> Error {
    if err.is_not_found() {
        Error::Conflict(format!("{unique_id} was modified concurrently"))
    } else {
        err
    }
}
