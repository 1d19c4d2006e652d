//! Session registry: which connection each execution context is bound to.
//!
//! Every context moves through `NoConnection -> Bound -> NoConnection`. The
//! registry map is guarded by an async `RwLock` that is only held long enough
//! to find or insert a context slot; each slot has its own async mutex, so a
//! long statement on one context never blocks another context.

use crate::db::connection::{Connection, Detached};
use crate::db::driver::{Driver, NativeConnection};
use crate::db::pool::{ConnectionPool, Fingerprint};
use crate::error::{SqlError, SqlResult};
use crate::models::{ConnectionConfig, ContextId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Per-context state.
pub struct ContextSlot<D: Driver> {
    connection: Option<Connection<D>>,
    /// Configuration of the last successful bind, kept after unbind so a later
    /// connect can adjust it.
    retained: Option<ConnectionConfig>,
}

impl<D: Driver> Default for ContextSlot<D> {
    fn default() -> Self {
        Self {
            connection: None,
            retained: None,
        }
    }
}

/// Exclusive access to a bound context.
///
/// The context's slot stays locked while this value lives; drop it before
/// calling other registry operations for the same context.
pub struct BoundSession<D: Driver> {
    context: ContextId,
    slot: OwnedMutexGuard<ContextSlot<D>>,
}

impl<D: Driver> BoundSession<D> {
    pub fn context(&self) -> &ContextId {
        &self.context
    }

    pub fn connection(&mut self) -> SqlResult<&mut Connection<D>> {
        self.slot
            .connection
            .as_mut()
            .ok_or_else(|| SqlError::no_active_connection(&self.context))
    }
}

impl<D: Driver> std::fmt::Debug for BoundSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundSession")
            .field("context", &self.context)
            .field("connection", &self.slot.connection)
            .finish()
    }
}

pub struct SessionRegistry<D: Driver> {
    driver: Arc<D>,
    pool: ConnectionPool<D>,
    contexts: RwLock<HashMap<ContextId, Arc<Mutex<ContextSlot<D>>>>>,
}

impl<D: Driver> SessionRegistry<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            pool: ConnectionPool::new(Arc::clone(&driver)),
            driver,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &ConnectionPool<D> {
        &self.pool
    }

    async fn slot(&self, context: &ContextId) -> Option<Arc<Mutex<ContextSlot<D>>>> {
        self.contexts.read().await.get(context).cloned()
    }

    async fn slot_or_insert(&self, context: &ContextId) -> Arc<Mutex<ContextSlot<D>>> {
        if let Some(slot) = self.slot(context).await {
            return slot;
        }
        let mut contexts = self.contexts.write().await;
        Arc::clone(contexts.entry(context.clone()).or_default())
    }

    /// The context's binding. `None` when unbound, unless `required`, in
    /// which case an unbound context is a `NoActiveConnection` error.
    pub async fn get(
        &self,
        context: &ContextId,
        required: bool,
    ) -> SqlResult<Option<BoundSession<D>>> {
        let unbound = || {
            if required {
                Err(SqlError::no_active_connection(context))
            } else {
                Ok(None)
            }
        };

        let Some(slot) = self.slot(context).await else {
            return unbound();
        };
        let guard = slot.lock_owned().await;
        if guard.connection.is_none() {
            return unbound();
        }
        Ok(Some(BoundSession {
            context: context.clone(),
            slot: guard,
        }))
    }

    /// The context's binding, or `NoActiveConnection`.
    pub async fn require(&self, context: &ContextId) -> SqlResult<BoundSession<D>> {
        self.get(context, true)
            .await?
            .ok_or_else(|| SqlError::no_active_connection(context))
    }

    /// Bind `context` to a connection for `config`, replacing any current
    /// binding. On failure the context is left unbound.
    pub async fn bind(&self, context: &ContextId, config: ConnectionConfig) -> SqlResult<()> {
        let slot = self.slot_or_insert(context).await;
        let mut guard = slot.lock().await;

        if let Some(previous) = guard.connection.take() {
            debug!(context = %context, connection_id = %previous.id(), "Replacing existing binding");
            if let Err(e) = self.dispose(previous).await {
                warn!(context = %context, error = %e, "Failed to close replaced connection");
            }
        }

        let opened = if config.pooled {
            self.pool
                .acquire(&config)
                .await
                .map(|native| (native, Some(config.fingerprint())))
        } else {
            self.open_direct(&config).await.map(|native| (native, None))
        };

        let (native, pooled) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(
                    context = %context,
                    url = %config.masked_url(),
                    error = %e,
                    "Bind failed"
                );
                return Err(e);
            }
        };

        guard.connection = Some(Connection::new(
            context.clone(),
            config.clone(),
            native,
            pooled,
        ));
        guard.retained = Some(config);
        Ok(())
    }

    async fn open_direct(&self, config: &ConnectionConfig) -> SqlResult<D::Connection> {
        let url = config.url()?;
        self.driver.connect(config.dialect(), &url).await
    }

    /// Return a connection's native handle to where it came from.
    async fn dispose(&self, connection: Connection<D>) -> SqlResult<()> {
        let Detached {
            native,
            pooled,
            schema_switched,
        } = connection.detach();
        match pooled {
            Some(fingerprint) if schema_switched => self.pool.discard(&fingerprint, native).await,
            Some(fingerprint) => self.pool.release(&fingerprint, native).await,
            None => native.close().await,
        }
    }

    /// Remove the binding held by `session`. A failing native close is
    /// reported after the binding is gone.
    pub async fn detach(&self, mut session: BoundSession<D>) -> SqlResult<()> {
        match session.slot.connection.take() {
            Some(connection) => {
                info!(
                    context = %session.context,
                    connection_id = %connection.id(),
                    "Connection unbound"
                );
                self.dispose(connection).await
            }
            None => Ok(()),
        }
    }

    /// Remove the binding held by `session` and close its native connection.
    /// A pooled connection gives back its loan but never rejoins the idle set.
    pub async fn discard(&self, mut session: BoundSession<D>) -> SqlResult<()> {
        let Some(connection) = session.slot.connection.take() else {
            return Ok(());
        };
        info!(
            context = %session.context,
            connection_id = %connection.id(),
            "Connection discarded"
        );
        let Detached { native, pooled, .. } = connection.detach();
        match pooled {
            Some(fingerprint) => self.pool.discard(&fingerprint, native).await,
            None => native.close().await,
        }
    }

    /// Unbind `context`. Unbinding an unbound context is a no-op.
    pub async fn unbind(&self, context: &ContextId) -> SqlResult<()> {
        match self.get(context, false).await? {
            Some(session) => self.detach(session).await,
            None => Ok(()),
        }
    }

    /// Bound with an open, not yet exhausted cursor.
    pub async fn available(&self, context: &ContextId) -> bool {
        match self.slot(context).await {
            Some(slot) => slot
                .lock()
                .await
                .connection
                .as_ref()
                .is_some_and(|c| c.resultset_available()),
            None => false,
        }
    }

    pub async fn retained_config(&self, context: &ContextId) -> Option<ConnectionConfig> {
        let slot = self.slot(context).await?;
        let guard = slot.lock().await;
        guard.retained.clone()
    }

    /// Unbind `context` and forget everything about it.
    pub async fn teardown(&self, context: &ContextId) -> SqlResult<()> {
        let result = self.unbind(context).await;
        self.contexts.write().await.remove(context);
        debug!(context = %context, "Context torn down");
        result
    }

    /// Unbind every context; returns how many bindings were removed.
    pub async fn unbind_all(&self) -> usize {
        let slots: Vec<(ContextId, Arc<Mutex<ContextSlot<D>>>)> = self
            .contexts
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut unbound = 0;
        for (context, slot) in slots {
            let connection = slot.lock().await.connection.take();
            if let Some(connection) = connection {
                unbound += 1;
                if let Err(e) = self.dispose(connection).await {
                    warn!(context = %context, error = %e, "Failed to close connection");
                }
            }
        }
        if unbound > 0 {
            info!(count = unbound, "Unbound all contexts");
        }
        unbound
    }

    /// Unbind every context and drop all retained configurations.
    pub async fn clear(&self) -> usize {
        let unbound = self.unbind_all().await;
        self.contexts.write().await.clear();
        unbound
    }

    pub async fn bound_count(&self) -> usize {
        let slots: Vec<Arc<Mutex<ContextSlot<D>>>> =
            self.contexts.read().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.connection.is_some() {
                count += 1;
            }
        }
        count
    }

    /// Fingerprint of the pool loan held by `context`, if any.
    pub async fn pooled_fingerprint(&self, context: &ContextId) -> Option<Fingerprint> {
        let mut session = self.get(context, false).await.ok()??;
        session.connection().ok()?.pool_fingerprint().cloned()
    }
}

impl<D: Driver> std::fmt::Debug for SessionRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("driver", &self.driver.name())
            .field("pool", &self.pool)
            .finish()
    }
}
