//! Connection pool management.
//!
//! Pooled connections are grouped by [`Fingerprint`]: two configurations that
//! would open an identical native connection share idle connections. Each
//! group is bounded by the configuration's `max_connections`.
//!
//! # Concurrency Safety
//!
//! - All bookkeeping for every group lives behind one `std::sync::Mutex`
//! - The lock is never held across an await; native connects and closes
//!   happen outside it
//! - A slot is reserved before connecting and handed back by a drop guard if
//!   the connect fails or the future is dropped, so `loaned + idle <= max`
//!   holds at every point

use crate::db::dialect::Brand;
use crate::db::driver::{Driver, NativeConnection};
use crate::error::{SqlError, SqlResult};
use crate::models::ConnectionConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Canonical identity of a pooled configuration.
///
/// Host names compare case-insensitively and the port is the effective one,
/// so `port=0` and the brand default land in the same group. The password
/// takes part in equality but is never displayed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    brand: Brand,
    host: String,
    port: u16,
    username: String,
    schema: String,
    password: String,
}

impl Fingerprint {
    pub fn of(config: &ConnectionConfig) -> Self {
        Self {
            brand: config.brand,
            host: config.host.to_lowercase(),
            port: config.port(),
            username: config.username.clone(),
            schema: config.schema.clone(),
            password: config.password.clone(),
        }
    }

    pub fn brand(&self) -> Brand {
        self.brand
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}://{}@{}:{}/{}",
            self.brand.dialect().driver,
            self.username,
            self.host,
            self.port,
            self.schema
        )
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprint")
            .field("brand", &self.brand)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("schema", &self.schema)
            .field("password", &"****")
            .finish()
    }
}

/// Snapshot of one pool group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub loaned: usize,
    pub max: u32,
}

struct PoolSlot<C> {
    idle: Vec<C>,
    loaned: usize,
    max: u32,
    /// Set by `drain`: connections coming back are closed instead of kept.
    retired: bool,
}

impl<C> PoolSlot<C> {
    fn new(max: u32) -> Self {
        Self {
            idle: Vec::new(),
            loaned: 0,
            max,
            retired: false,
        }
    }

    fn occupied(&self) -> usize {
        self.loaned + self.idle.len()
    }

    /// Give back one loan. Saturates at 0 to tolerate extra release calls.
    fn return_loan(&mut self, fingerprint: &Fingerprint) {
        if self.loaned == 0 {
            warn!(
                fingerprint = %fingerprint,
                "Pool loan underflow detected - extra release call"
            );
            return;
        }
        self.loaned -= 1;
    }

    fn is_unused(&self) -> bool {
        self.loaned == 0 && self.idle.is_empty()
    }
}

/// Bounded pool of native connections, shared by every context.
pub struct ConnectionPool<D: Driver> {
    driver: Arc<D>,
    slots: Mutex<HashMap<Fingerprint, PoolSlot<D::Connection>>>,
}

/// Holds a reserved slot until the native connect succeeds.
struct Reservation<'a, D: Driver> {
    pool: &'a ConnectionPool<D>,
    fingerprint: &'a Fingerprint,
    armed: bool,
}

impl<D: Driver> Reservation<'_, D> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<D: Driver> Drop for Reservation<'_, D> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.pool.lock();
        if let Some(slot) = slots.get_mut(self.fingerprint) {
            slot.return_loan(self.fingerprint);
            if slot.is_unused() {
                slots.remove(self.fingerprint);
            }
        }
        debug!(fingerprint = %self.fingerprint, "Released pool reservation after failed connect");
    }
}

impl<D: Driver> ConnectionPool<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, PoolSlot<D::Connection>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loan a connection for `config`, reusing an idle one when possible.
    pub async fn acquire(&self, config: &ConnectionConfig) -> SqlResult<D::Connection> {
        let fingerprint = config.fingerprint();
        let max = config.max_connections.max(1);

        {
            let mut slots = self.lock();
            let slot = slots
                .entry(fingerprint.clone())
                .or_insert_with(|| PoolSlot::new(max));
            slot.max = max;
            slot.retired = false;

            if let Some(native) = slot.idle.pop() {
                slot.loaned += 1;
                debug!(
                    fingerprint = %fingerprint,
                    loaned = slot.loaned,
                    idle = slot.idle.len(),
                    "Reusing idle pooled connection"
                );
                return Ok(native);
            }

            if slot.occupied() >= max as usize {
                warn!(fingerprint = %fingerprint, max = max, "Connection pool exhausted");
                return Err(SqlError::pool_exhausted(max));
            }
            slot.loaned += 1;
        } // Lock released here

        let reservation = Reservation {
            pool: self,
            fingerprint: &fingerprint,
            armed: true,
        };

        let url = config.url()?;
        let native = self.driver.connect(config.dialect(), &url).await?;
        reservation.disarm();

        info!(
            fingerprint = %fingerprint,
            url = %config.masked_url(),
            "Opened pooled connection"
        );
        Ok(native)
    }

    /// Return a loaned connection. It is closed instead of kept when the group
    /// was drained or shrank below its current size.
    pub async fn release(&self, fingerprint: &Fingerprint, native: D::Connection) -> SqlResult<()> {
        let surplus = {
            let mut slots = self.lock();
            match slots.get_mut(fingerprint) {
                Some(slot) => {
                    slot.return_loan(fingerprint);
                    if slot.retired || slot.occupied() >= slot.max as usize {
                        if slot.is_unused() {
                            slots.remove(fingerprint);
                        }
                        Some(native)
                    } else {
                        slot.idle.push(native);
                        debug!(
                            fingerprint = %fingerprint,
                            idle = slot.idle.len(),
                            "Returned connection to pool"
                        );
                        None
                    }
                }
                None => Some(native),
            }
        };

        match surplus {
            Some(native) => native.close().await,
            None => Ok(()),
        }
    }

    /// Give back a loan without returning the connection, closing it.
    pub async fn discard(&self, fingerprint: &Fingerprint, native: D::Connection) -> SqlResult<()> {
        {
            let mut slots = self.lock();
            if let Some(slot) = slots.get_mut(fingerprint) {
                slot.return_loan(fingerprint);
                if slot.is_unused() {
                    slots.remove(fingerprint);
                }
            }
        }
        debug!(fingerprint = %fingerprint, "Discarding pooled connection");
        native.close().await
    }

    /// Close every idle connection of one group. Connections still on loan
    /// are closed when they come back.
    pub async fn drain(&self, fingerprint: &Fingerprint) -> usize {
        let idle = {
            let mut slots = self.lock();
            match slots.get_mut(fingerprint) {
                Some(slot) => {
                    slot.retired = true;
                    let idle = std::mem::take(&mut slot.idle);
                    if slot.is_unused() {
                        slots.remove(fingerprint);
                    }
                    idle
                }
                None => Vec::new(),
            }
        };
        let closed = close_all(idle).await;
        if closed > 0 {
            info!(fingerprint = %fingerprint, closed = closed, "Drained pool");
        }
        closed
    }

    /// Drain every group. Used at shutdown.
    pub async fn drain_all(&self) -> usize {
        let idle: Vec<D::Connection> = {
            let mut slots = self.lock();
            let idle: Vec<D::Connection> = slots
                .values_mut()
                .flat_map(|slot| {
                    slot.retired = true;
                    std::mem::take(&mut slot.idle)
                })
                .collect();
            slots.retain(|_, slot| !slot.is_unused());
            idle
        };
        let closed = close_all(idle).await;
        info!(closed = closed, "Drained all pools");
        closed
    }

    pub fn stats(&self, fingerprint: &Fingerprint) -> Option<PoolStats> {
        self.lock().get(fingerprint).map(|slot| PoolStats {
            idle: slot.idle.len(),
            loaned: slot.loaned,
            max: slot.max,
        })
    }

    /// Number of fingerprint groups currently tracked.
    pub fn group_count(&self) -> usize {
        self.lock().len()
    }
}

async fn close_all<C: NativeConnection>(connections: Vec<C>) -> usize {
    let mut closed = 0;
    for native in connections {
        if let Err(e) = native.close().await {
            warn!(error = %e, "Failed to close pooled connection");
        }
        closed += 1;
    }
    closed
}

impl<D: Driver> std::fmt::Debug for ConnectionPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("driver", &self.driver.name())
            .field("groups", &self.group_count())
            .finish()
    }
}
