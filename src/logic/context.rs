//! Process-wide [`AppContext`] and per-request [`RequestContext`].

use anyhow::Context as _;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::{AppConfig, StoreBackend};
use crate::error::{AppError, AppResult};
use crate::logic::hooks::{HookDispatcher, HookEvent, LogAuditSink};
use crate::model::{QueryContract, Record, UserContext};
use crate::store::cache::{MemoryCache, NoopCache, ResponseCache};
use crate::store::memory::MemoryStore;
use crate::store::postgres::PostgresStore;
use crate::store::query::{Condition, SelectQuery};
use crate::store::traits::{Store, Transaction};

/// How the boundary resolves a request's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Commit,
    Rollback,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub default_per_page: u64,
    pub max_per_page: u64,
    pub default_permissions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_per_page: 10,
            max_per_page: 100,
            default_permissions: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_per_page: config.pagination.default_per_page,
            max_per_page: config.pagination.max_per_page.max(1),
            default_permissions: config.auth.default_permissions.clone(),
        }
    }
}

/// Dependencies shared by every request, built once at startup.
pub struct AppContext {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn ResponseCache>,
    pub hooks: HookDispatcher,
    pub settings: Settings,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn ResponseCache>,
        hooks: HookDispatcher,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            cache,
            hooks,
            settings,
        }
    }

    /// Build the store, cache and hook worker described by `config`.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = match config.database.backend {
            StoreBackend::Postgres => {
                let database_url = config.database_url()?;
                let store = PostgresStore::new(
                    &database_url,
                    config.database.max_connections.unwrap_or(20),
                )
                .await?;
                store
                    .migrate()
                    .await
                    .context("Failed to prepare the database schema")?;
                Arc::new(store)
            }
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        let cache: Arc<dyn ResponseCache> = if config.cache.enabled {
            Arc::new(MemoryCache::new())
        } else {
            Arc::new(NoopCache)
        };
        let hooks = match config.hooks.queue_capacity {
            0 => HookDispatcher::disabled(),
            capacity => HookDispatcher::spawn(capacity, Arc::new(LogAuditSink)),
        };

        Ok(Self::new(store, cache, hooks, Settings::from_config(config)))
    }

    /// Start a request scope. The transaction is only opened on first use.
    pub fn begin_request(self: &Arc<Self>, user: UserContext) -> RequestContext {
        RequestContext {
            app: self.clone(),
            user,
            tx: Mutex::new(TxState::Idle),
            pending: parking_lot::Mutex::new(Pending::default()),
        }
    }

    /// Drain queued audit events and release the store.
    pub async fn shutdown(&self) {
        self.hooks.close().await;
        self.store.close().await;
    }
}

enum TxState {
    Idle,
    Open(Box<dyn Transaction>),
    Finished,
}

/// Cache entries to evict; `ids: None` evicts the whole end-point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub end_point: &'static str,
    pub ids: Option<Vec<String>>,
}

#[derive(Default)]
struct Pending {
    invalidations: Vec<Invalidation>,
    events: Vec<HookEvent>,
    written: BTreeSet<&'static str>,
}

/// Everything one request needs: identity, its single transaction and the
/// work deferred until that transaction commits.
pub struct RequestContext {
    app: Arc<AppContext>,
    pub user: UserContext,
    tx: Mutex<TxState>,
    pending: parking_lot::Mutex<Pending>,
}

impl RequestContext {
    pub fn settings(&self) -> &Settings {
        &self.app.settings
    }

    pub fn cache(&self) -> &dyn ResponseCache {
        self.app.cache.as_ref()
    }

    pub fn require(&self, permission: &str) -> AppResult<()> {
        if self.user.has_permission(permission) {
            Ok(())
        } else {
            log::debug!("user {} lacks {}", self.user.user_id, permission);
            Err(AppError::forbidden(permission))
        }
    }

    async fn open(&self) -> AppResult<MutexGuard<'_, TxState>> {
        let mut state = self.tx.lock().await;
        match *state {
            TxState::Idle => {
                log::debug!("begin transaction for {}", self.user.user_id);
                *state = TxState::Open(self.app.store.begin().await?);
            }
            TxState::Open(_) => {}
            TxState::Finished => {
                return Err(AppError::Internal(
                    "request transaction already finished".to_string(),
                ))
            }
        }
        Ok(state)
    }

    pub async fn fetch(&self, query: &SelectQuery) -> AppResult<Vec<Record>> {
        let mut state = self.open().await?;
        match &mut *state {
            TxState::Open(tx) => Ok(tx.fetch(query).await?),
            _ => Err(finished()),
        }
    }

    pub async fn count(&self, query: &SelectQuery) -> AppResult<u64> {
        let mut state = self.open().await?;
        match &mut *state {
            TxState::Open(tx) => Ok(tx.count(query).await?),
            _ => Err(finished()),
        }
    }

    pub async fn insert(
        &self,
        contract: &'static QueryContract,
        rows: &[Record],
    ) -> AppResult<u64> {
        let mut state = self.open().await?;
        match &mut *state {
            TxState::Open(tx) => Ok(tx.insert(contract, rows).await?),
            _ => Err(finished()),
        }
    }

    pub async fn update(
        &self,
        contract: &'static QueryContract,
        conditions: &[Condition],
        changes: &Record,
    ) -> AppResult<u64> {
        let mut state = self.open().await?;
        match &mut *state {
            TxState::Open(tx) => Ok(tx.update(contract, conditions, changes).await?),
            _ => Err(finished()),
        }
    }

    /// Whether this request wrote `end_point` and must bypass its cache.
    pub fn has_written(&self, end_point: &str) -> bool {
        self.pending.lock().written.contains(end_point)
    }

    /// Record a write to `contract`: evict now and again after commit.
    pub fn record_write(&self, contract: &'static QueryContract, ids: Vec<String>) {
        let mut invalidations = vec![Invalidation {
            end_point: contract.end_point,
            ids: Some(ids),
        }];
        invalidations.extend(
            contract
                .affected_end_points()
                .into_iter()
                .filter(|ep| *ep != contract.end_point)
                .map(|end_point| Invalidation {
                    end_point,
                    ids: None,
                }),
        );
        for invalidation in &invalidations {
            self.evict(invalidation);
        }
        let mut pending = self.pending.lock();
        pending
            .written
            .extend(invalidations.iter().map(|i| i.end_point));
        pending.invalidations.extend(invalidations);
    }

    fn evict(&self, invalidation: &Invalidation) {
        log::debug!(
            "invalidate {} {:?}",
            invalidation.end_point,
            invalidation.ids
        );
        match &invalidation.ids {
            Some(ids) => self.cache().invalidate(invalidation.end_point, ids),
            None => self.cache().invalidate_end_point(invalidation.end_point),
        }
    }

    /// Queue an audit event; it is dispatched only if the request commits.
    pub fn queue_event(&self, event: HookEvent) {
        self.pending.lock().events.push(event);
    }

    /// Resolve the transaction exactly once, then run or discard deferred work.
    pub async fn finish(&self, outcome: TxOutcome) -> AppResult<()> {
        let state = std::mem::replace(&mut *self.tx.lock().await, TxState::Finished);
        let pending = std::mem::take(&mut *self.pending.lock());

        match (state, outcome) {
            (TxState::Open(tx), TxOutcome::Commit) => {
                tx.commit().await?;
                log::debug!("committed transaction for {}", self.user.user_id);
            }
            (TxState::Open(tx), TxOutcome::Rollback) => {
                if let Err(e) = tx.rollback().await {
                    log::warn!("rollback failed: {:#}", e);
                }
                log::debug!(
                    "rolled back transaction for {}, dropping {} audit event(s)",
                    self.user.user_id,
                    pending.events.len()
                );
                return Ok(());
            }
            (TxState::Idle, _) => {}
            (TxState::Finished, _) => {
                log::warn!("request transaction finished twice");
                return Ok(());
            }
        }

        if outcome == TxOutcome::Commit {
            for invalidation in &pending.invalidations {
                self.evict(invalidation);
            }
            for event in pending.events {
                self.app.hooks.dispatch(event);
            }
        }
        Ok(())
    }
}

fn finished() -> AppError {
    AppError::Internal("request transaction already finished".to_string())
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if let TxState::Open(_) = self.tx.get_mut() {
            log::warn!(
                "request for {} ended without resolving its transaction; rolling back",
                self.user.user_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::hooks::tests::{event, RecordingSink};
    use crate::model::SURVEY_CONTRACT;
    use crate::store::cache::{detail_key, list_key};
    use serde_json::json;

    fn app(store: MemoryStore, sink: Arc<RecordingSink>) -> Arc<AppContext> {
        Arc::new(AppContext::new(
            Arc::new(store),
            Arc::new(MemoryCache::new()),
            HookDispatcher::spawn(8, sink),
            Settings::default(),
        ))
    }

    fn row() -> Record {
        let mut row = Record::new();
        row.insert("id".into(), json!(uuid::Uuid::new_v4().to_string()));
        row.insert("title".into(), json!("T"));
        row
    }

    #[tokio::test]
    async fn test_commit_dispatches_events_and_replays_invalidations() {
        let store = MemoryStore::new();
        let sink = Arc::new(RecordingSink::default());
        let app = app(store.clone(), sink.clone());

        let ctx = app.begin_request(UserContext::system());
        ctx.insert(&SURVEY_CONTRACT, &[row()]).await.unwrap();
        ctx.record_write(&SURVEY_CONTRACT, vec!["a".to_string()]);
        ctx.queue_event(event("POST"));
        assert!(ctx.has_written("surveys"));
        assert!(ctx.has_written("questions"));

        // A concurrent reader repopulates the list before the commit.
        app.cache.set(list_key("surveys", &[]), "stale".to_string());
        app.cache.set(detail_key("questions", "q"), "stale".to_string());

        ctx.finish(TxOutcome::Commit).await.unwrap();
        app.shutdown().await;

        assert!(app.cache.get("surveys?").is_none());
        assert!(app.cache.get("questions.q").is_none());
        assert_eq!(store.rows("surveys").len(), 1);
        assert_eq!(sink.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_rows_and_events() {
        let store = MemoryStore::new();
        let sink = Arc::new(RecordingSink::default());
        let app = app(store.clone(), sink.clone());

        let ctx = app.begin_request(UserContext::system());
        ctx.insert(&SURVEY_CONTRACT, &[row()]).await.unwrap();
        ctx.queue_event(event("POST"));
        ctx.finish(TxOutcome::Rollback).await.unwrap();
        app.shutdown().await;

        assert!(store.rows("surveys").is_empty());
        assert!(sink.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_finished_context_refuses_more_work() {
        let app = app(MemoryStore::new(), Arc::new(RecordingSink::default()));
        let ctx = app.begin_request(UserContext::system());
        ctx.finish(TxOutcome::Commit).await.unwrap();

        let err = ctx
            .fetch(&SelectQuery::with_defaults(&SURVEY_CONTRACT))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn test_require_checks_permissions() {
        let app = app(MemoryStore::new(), Arc::new(RecordingSink::default()));
        let ctx = app.begin_request(
            UserContext::new("u".to_string()).with_permissions(["surveys.*"]),
        );
        assert!(ctx.require("surveys.create").is_ok());
        assert!(matches!(
            ctx.require("questions.create"),
            Err(AppError::Forbidden { .. })
        ));
    }
}
