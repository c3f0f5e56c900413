//! Read-only projections of the security history.

use chrono::{DateTime, Utc};
use secmaster_core::{
    Error, IdentityScheme, IntervalQuery, ObjectId, Resolution, Result, SearchQuery,
    SecurityDocument, Store, TimeSource, UniqueId, VersionCorrection,
};
use std::collections::BTreeMap;

use crate::request::{HistoryRequest, HistoryResult, SearchRequest, SearchResult};

#[derive(Debug)]
pub struct QueryWorker<'a> {
    pub(crate) store: &'a Store,
    pub(crate) clock: &'a dyn TimeSource,
    pub(crate) scheme: &'a IdentityScheme,
}

impl QueryWorker<'_> {
    /// Unversioned ids resolve to the latest correction of the latest
    /// version, version-only ids to the latest correction of that version.
    pub fn get(&self, unique_id: &UniqueId) -> Result<SecurityDocument> {
        log::debug!("get {unique_id}");
        let record = match self.scheme.resolve(unique_id)? {
            Resolution::Latest { object_id } => self.store.find_latest_version(object_id)?,
            Resolution::Version { object_id, version } => {
                self.store.find_version(object_id, version)?
            }
            Resolution::Exact {
                object_id,
                version,
                correction,
            } => self
                .store
                .find_by_unique_id(object_id, version, correction)?,
        };
        Ok(self.scheme.document(record))
    }

    /// The document of `object_id` valid at the given instants.
    pub fn get_at(
        &self,
        object_id: &ObjectId,
        version_correction: VersionCorrection,
    ) -> Result<SecurityDocument> {
        let oid = self.scheme.extract_oid(object_id)?;
        let (version_as_of, corrected_to) = version_correction.with_latest_fixed(self.clock.now());
        log::debug!("get {object_id} at {version_as_of} corrected to {corrected_to}");
        let record = self.store.find_at(oid, version_as_of, corrected_to)?;
        Ok(self.scheme.document(record))
    }

    /// Fails on the first id that cannot be resolved.
    pub fn get_many(
        &self,
        unique_ids: &[UniqueId],
    ) -> Result<BTreeMap<UniqueId, SecurityDocument>> {
        unique_ids
            .iter()
            .map(|id| Ok((id.clone(), self.get(id)?)))
            .collect()
    }

    pub fn history(&self, request: &HistoryRequest) -> Result<HistoryResult> {
        log::debug!("history {request:?}");
        check_window(
            "versions",
            request.versions_from_instant,
            request.versions_to_instant,
        )?;
        check_window(
            "corrections",
            request.corrections_from_instant,
            request.corrections_to_instant,
        )?;
        let oid = self.scheme.extract_oid(&request.object_id)?;
        let window = IntervalQuery {
            versions_from: request.versions_from_instant,
            versions_to: request.versions_to_instant,
            corrections_from: request.corrections_from_instant,
            corrections_to: request.corrections_to_instant,
        };
        let (records, paging) = self
            .store
            .query_interval_page(oid, &window, request.paging)?;
        Ok(HistoryResult {
            paging,
            documents: records
                .into_iter()
                .map(|record| self.scheme.document(record))
                .collect(),
        })
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        log::debug!("search {request:?}");
        let object_ids = request
            .object_ids
            .as_ref()
            .map(|ids| {
                ids.iter()
                    .map(|id| self.scheme.extract_oid(id))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;
        let (version_as_of, corrected_to) = request
            .version_correction
            .with_latest_fixed(self.clock.now());

        let query = SearchQuery {
            object_ids,
            name: request.name.clone(),
            security_type: request.security_type.clone(),
            identifier_bundles: request.identifier_bundles.clone(),
            external_id_value: request.external_id_value.clone(),
            version_as_of,
            corrected_to,
        };
        let (records, paging) = self.store.search(&query, request.paging)?;
        Ok(SearchResult {
            paging,
            documents: records
                .into_iter()
                .map(|record| self.scheme.document(record))
                .collect(),
            version_correction: VersionCorrection::of(version_as_of, corrected_to),
        })
    }
}

fn check_window(
    axis: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<()> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(Error::InvalidArgument(format!(
            "{axis} window ends before it starts: {from} > {to}"
        ))),
        _ => Ok(()),
    }
}
