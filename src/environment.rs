//! Environment facade: the primitives a simulation script calls.
//!
//! An [`Environment`] owns the session registry, the connection pool behind
//! it, the environment-wide pooling policy and the externally supplied
//! setting defaults. It is constructed explicitly and shared as an `Arc`;
//! there is no process-wide instance.

use crate::db::connection::Execution;
use crate::db::driver::{Driver, StatementKind};
use crate::db::session::{BoundSession, SessionRegistry};
use crate::error::{SqlError, SqlResult};
use crate::models::settings::{Setting, SettingsLayer, SettingsMode, parse_settings};
use crate::models::{ConnectionConfig, ContextId, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Crate version reported by `show-version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Environment<D: Driver> {
    registry: SessionRegistry<D>,
    /// Installed by `set_connection_pooling`; contexts without a binding are
    /// bound from the pool with this configuration on first use.
    policy: Mutex<Option<ConnectionConfig>>,
    defaults: SettingsLayer,
}

impl<D: Driver> Environment<D> {
    pub fn new(driver: D, defaults: SettingsLayer) -> Self {
        Self {
            registry: SessionRegistry::new(Arc::new(driver)),
            policy: Mutex::new(None),
            defaults,
        }
    }

    pub fn with_driver(driver: D) -> Self {
        Self::new(driver, SettingsLayer::default())
    }

    pub fn registry(&self) -> &SessionRegistry<D> {
        &self.registry
    }

    fn policy_lock(&self) -> MutexGuard<'_, Option<ConnectionConfig>> {
        self.policy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The installed pooling policy, if any.
    pub fn pooling_policy(&self) -> Option<ConnectionConfig> {
        self.policy_lock().clone()
    }

    /// Bind `context` to a connection described by `settings`.
    ///
    /// Settings are layered over the endpoint of the context's previous
    /// configuration, which sits over the pooling policy, else the external
    /// defaults. Pooling always follows the current policy. Invalid settings
    /// leave any current binding untouched.
    pub async fn connect(&self, context: &ContextId, settings: &[Setting]) -> SqlResult<()> {
        let mut base = self.policy_base();
        if let Some(config) = self.registry.retained_config(context).await {
            base = base.merge(SettingsLayer::endpoint_of(&config));
        }
        let config = parse_settings(SettingsMode::Explicit, settings, &base)?;
        self.registry.bind(context, config).await
    }

    pub async fn disconnect(&self, context: &ContextId) -> SqlResult<()> {
        self.registry.unbind(context).await
    }

    fn policy_base(&self) -> SettingsLayer {
        match self.pooling_policy() {
            Some(policy) => SettingsLayer::from_config(&policy),
            None => self.defaults.clone(),
        }
    }

    /// Install an environment-wide pooling policy.
    ///
    /// Settings merge over the current policy. When the policy's fingerprint
    /// changes, idle connections of the old fingerprint are closed.
    pub async fn set_connection_pooling(
        &self,
        context: &ContextId,
        settings: &[Setting],
    ) -> SqlResult<()> {
        let config = parse_settings(SettingsMode::Pooled, settings, &self.policy_base())?;
        let fingerprint = config.fingerprint();
        info!(
            context = %context,
            fingerprint = %fingerprint,
            max_connections = config.max_connections,
            auto_disconnect = config.auto_disconnect,
            "Pooling policy installed"
        );

        let previous = self.policy_lock().replace(config);
        if let Some(previous) = previous {
            let old = previous.fingerprint();
            if old != fingerprint {
                self.registry.pool().drain(&old).await;
            }
        }
        Ok(())
    }

    /// The context's binding, binding it from the pool first when it has
    /// none and a pooling policy is installed.
    async fn session(&self, context: &ContextId) -> SqlResult<BoundSession<D>> {
        if let Some(session) = self.registry.get(context, false).await? {
            return Ok(session);
        }
        let Some(policy) = self.pooling_policy() else {
            return Err(SqlError::no_active_connection(context));
        };
        debug!(context = %context, "Binding context from pool on first use");
        self.registry.bind(context, policy).await?;
        self.registry.require(context).await
    }

    async fn exec(&self, context: &ContextId, sql: &str, kind: StatementKind) -> SqlResult<Execution> {
        let mut session = self.session(context).await?;
        let connection = session.connection()?;
        let result = connection.execute(sql, kind).await;
        let auto_disconnect = connection.auto_disconnects();

        match result {
            Ok(Execution::Affected(n)) => {
                if auto_disconnect {
                    self.registry.detach(session).await?;
                }
                Ok(Execution::Affected(n))
            }
            result => self.check_link(session, result).await,
        }
    }

    /// Drop the binding when `result` reports a lost link. The native
    /// connection is closed, never returned to the pool.
    async fn check_link<T>(&self, session: BoundSession<D>, result: SqlResult<T>) -> SqlResult<T> {
        if let Err(e @ SqlError::Connection { .. }) = &result {
            let context = session.context().clone();
            warn!(context = %context, error = %e, "Connection lost, unbinding");
            if let Err(close_err) = self.registry.discard(session).await {
                debug!(context = %context, error = %close_err, "Close after connection loss failed");
            }
        }
        result
    }

    pub async fn exec_direct(&self, context: &ContextId, sql: &str) -> SqlResult<Execution> {
        self.exec(context, sql, StatementKind::Direct).await
    }

    pub async fn exec_query(&self, context: &ContextId, sql: &str) -> SqlResult<Execution> {
        self.exec(context, sql, StatementKind::Query).await
    }

    pub async fn exec_update(&self, context: &ContextId, sql: &str) -> SqlResult<Execution> {
        self.exec(context, sql, StatementKind::Update).await
    }

    /// Next row of the context's cursor. Empty when unbound, when there is no
    /// cursor and at end of data.
    pub async fn fetch_row(&self, context: &ContextId) -> SqlResult<Vec<Value>> {
        let Some(mut session) = self.registry.get(context, false).await? else {
            return Ok(Vec::new());
        };
        let connection = session.connection()?;
        let row = connection.fetch_row();
        let release = connection.cursor_drained() && connection.auto_disconnects();

        if release {
            debug!(context = %context, "Result set drained, returning connection to pool");
            self.registry.detach(session).await?;
        }
        row
    }

    pub async fn resultset_available(&self, context: &ContextId) -> bool {
        self.registry.available(context).await
    }

    pub fn show_version(&self) -> &'static str {
        VERSION
    }

    pub async fn use_database(&self, context: &ContextId, name: &str) -> SqlResult<()> {
        let mut session = self.session(context).await?;
        let result = session.connection()?.use_database(name).await;
        self.check_link(session, result).await
    }

    pub async fn current_database(&self, context: &ContextId) -> SqlResult<String> {
        let mut session = self.session(context).await?;
        let result = session.connection()?.current_database().await;
        self.check_link(session, result).await
    }

    pub async fn find_database(&self, context: &ContextId, name: &str) -> SqlResult<bool> {
        let mut session = self.session(context).await?;
        let result = session.connection()?.find_database(name).await;
        self.check_link(session, result).await
    }

    /// Unbind `context` and forget its retained configuration.
    pub async fn teardown(&self, context: &ContextId) -> SqlResult<()> {
        self.registry.teardown(context).await
    }

    /// Unbind every context and close every idle pooled connection.
    pub async fn shutdown(&self) {
        let unbound = self.registry.unbind_all().await;
        let drained = self.registry.pool().drain_all().await;
        info!(unbound = unbound, drained = drained, "Environment shut down");
    }

    /// Shut down and forget the pooling policy and every retained
    /// configuration.
    pub async fn reset(&self) {
        self.shutdown().await;
        self.registry.clear().await;
        self.policy_lock().take();
        debug!("Environment reset");
    }
}

impl<D: Driver> std::fmt::Debug for Environment<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("registry", &self.registry)
            .field("pooling", &self.pooling_policy().map(|p| p.fingerprint()))
            .finish()
    }
}
