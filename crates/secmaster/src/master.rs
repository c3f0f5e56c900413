use secmaster_core::{
    IdentityScheme, ObjectId, Result, Security, SecurityDocument, Store, SystemTimeSource,
    TimeSource, UniqueId, VersionCorrection,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::changes::ChangeManager;
use crate::config::MasterConfig;
use crate::modify::ModifyWorker;
use crate::query::QueryWorker;
use crate::request::{HistoryRequest, HistoryResult, SearchRequest, SearchResult};

const DEFAULT_MAX_RETRIES: usize = 10;

/// A bitemporal security master backed by one SQLite connection.
///
/// Modifications take `&mut self` and run as single transactions; queries
/// take `&self`. Threads that write concurrently should each open their own
/// master on the same database file.
#[derive(Debug)]
pub struct SecurityMaster {
    store: Store,
    clock: Arc<dyn TimeSource>,
    scheme: IdentityScheme,
    changes: ChangeManager,
    max_retries: usize,
}

impl SecurityMaster {
    /// Open the database named by `config`, creating the file if needed.
    /// The parent directory must exist; see
    /// [`MasterConfig::ensure_database_dir`].
    pub fn open(config: &MasterConfig) -> Result<Self> {
        let store = Store::open(&config.database_path)?;
        store.set_busy_timeout(config.busy_timeout())?;
        log::info!("opened security master at {}", config.database_path.display());
        Ok(Self::new(store)
            .with_scheme(IdentityScheme::new(config.scheme.as_str())?)
            .with_max_retries(config.max_retries))
    }

    /// An empty in-memory master (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store,
            clock: Arc::new(SystemTimeSource),
            scheme: IdentityScheme::default(),
            changes: ChangeManager::new(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[must_use]
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: IdentityScheme) -> Self {
        self.scheme = scheme;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub const fn scheme(&self) -> &IdentityScheme {
        &self.scheme
    }

    #[must_use]
    pub const fn change_manager(&self) -> &ChangeManager {
        &self.changes
    }

    fn modifier(&mut self) -> ModifyWorker<'_> {
        ModifyWorker {
            store: &mut self.store,
            clock: self.clock.as_ref(),
            scheme: &self.scheme,
            changes: &self.changes,
            max_retries: self.max_retries,
        }
    }

    fn querier(&self) -> QueryWorker<'_> {
        QueryWorker {
            store: &self.store,
            clock: self.clock.as_ref(),
            scheme: &self.scheme,
        }
    }

    pub fn add(&mut self, security: &Security) -> Result<SecurityDocument> {
        self.modifier().add(security)
    }

    pub fn update(&mut self, unique_id: &UniqueId, security: &Security) -> Result<SecurityDocument> {
        self.modifier().update(unique_id, security)
    }

    pub fn correct(
        &mut self,
        unique_id: &UniqueId,
        security: &Security,
    ) -> Result<SecurityDocument> {
        self.modifier().correct(unique_id, security)
    }

    pub fn remove(&mut self, unique_id: &UniqueId) -> Result<SecurityDocument> {
        self.modifier().remove(unique_id)
    }

    pub fn replace_version(
        &mut self,
        unique_id: &UniqueId,
        security: &Security,
    ) -> Result<SecurityDocument> {
        self.modifier().replace_version(unique_id, security)
    }

    /// Returns the earlier version extended over the retracted interval, if
    /// there was one.
    pub fn remove_version(&mut self, unique_id: &UniqueId) -> Result<Option<SecurityDocument>> {
        self.modifier().remove_version(unique_id)
    }

    pub fn get(&self, unique_id: &UniqueId) -> Result<SecurityDocument> {
        self.querier().get(unique_id)
    }

    pub fn get_at(
        &self,
        object_id: &ObjectId,
        version_correction: VersionCorrection,
    ) -> Result<SecurityDocument> {
        self.querier().get_at(object_id, version_correction)
    }

    pub fn get_many(
        &self,
        unique_ids: &[UniqueId],
    ) -> Result<BTreeMap<UniqueId, SecurityDocument>> {
        self.querier().get_many(unique_ids)
    }

    pub fn history(&self, request: &HistoryRequest) -> Result<HistoryResult> {
        self.querier().history(request)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        self.querier().search(request)
    }
}
