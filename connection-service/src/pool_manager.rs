//! Live connection registry.
//!
//! Holds at most one live connection per registered database id. Each id has
//! its own async slot lock, so creating, invalidating or evicting the
//! connection of one database never blocks another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use common::config::ConnectorSettings;
use common::errors::{AppError, AppResult};
use common::models::ConnectInfo;
use tokio::sync::Mutex;

use crate::driver::Driver;

/// A cached connection, its generation and the moment it was created.
struct LiveConnection<C> {
    conn: C,
    generation: u64,
    created_at: Instant,
}

/// A connection handed out by [`PoolManager::get_connection`].
///
/// `generation` identifies the slot entry the connection came from, so a
/// failure seen on it can only retire that entry and never a newer one.
#[derive(Clone)]
pub struct Lease<C> {
    pub conn: C,
    pub generation: u64,
}

type Slot<C> = Arc<Mutex<Option<LiveConnection<C>>>>;

/// Manages live connections keyed by database id.
///
/// Connections are always closed after their slot lock is released, so a
/// slow close never holds up callers waiting for a replacement.
pub struct PoolManager<D: Driver> {
    driver: Arc<D>,
    settings: ConnectorSettings,
    /// Slots indexed by database id; the outer lock only guards the map.
    slots: Mutex<HashMap<String, Slot<D::Conn>>>,
    next_generation: AtomicU64,
}

impl<D: Driver> PoolManager<D> {
    pub fn new(driver: Arc<D>, settings: ConnectorSettings) -> Self {
        Self {
            driver,
            settings,
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    async fn slot(&self, db_id: &str) -> Slot<D::Conn> {
        self.slots
            .lock()
            .await
            .entry(db_id.to_string())
            .or_default()
            .clone()
    }

    fn is_stale(&self, live: &LiveConnection<D::Conn>) -> bool {
        live.created_at.elapsed() > self.settings.max_connection_age
            || self.driver.is_closed(&live.conn)
    }

    /// Returns the cached connection of `db_id` or creates a new one.
    ///
    /// Creation makes up to `connect_retries` attempts, sleeping
    /// `retry_base_delay * 2^attempt` between them. The slot stays locked
    /// for the whole sequence, so concurrent callers for the same id wait
    /// for one connection instead of racing to open several.
    ///
    /// # Arguments
    /// * `db_id` - Registered database id, used as the cache key
    /// * `info` - Credentials used when a new connection is needed
    pub async fn get_connection(
        &self,
        db_id: &str,
        info: &ConnectInfo,
    ) -> AppResult<Lease<D::Conn>> {
        let slot = self.slot(db_id).await;
        let (result, retired) = {
            let mut guard = slot.lock().await;
            if let Some(live) = guard.as_ref() {
                if !self.is_stale(live) {
                    return Ok(Lease {
                        conn: live.conn.clone(),
                        generation: live.generation,
                    });
                }
            }
            let retired = guard.take();
            (self.connect_into(db_id, info, &mut guard).await, retired)
        };

        if let Some(stale) = retired {
            tracing::info!(db_id = %db_id, generation = stale.generation, "Closing stale connection");
            self.driver.close(&stale.conn).await;
        }
        result
    }

    async fn connect_into(
        &self,
        db_id: &str,
        info: &ConnectInfo,
        slot: &mut Option<LiveConnection<D::Conn>>,
    ) -> AppResult<Lease<D::Conn>> {
        let missing = info.missing_fields();
        if !missing.is_empty() {
            return Err(AppError::Configuration(format!(
                "connect_info of {db_id} is missing: {}",
                missing.join(", ")
            )));
        }

        let attempts = self.settings.connect_retries.max(1);
        let mut attempt = 0;
        loop {
            match self.driver.connect(info).await {
                Ok(conn) => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        db_id = %db_id,
                        engine = self.driver.engine_type(),
                        attempt = attempt + 1,
                        generation,
                        "Connection established"
                    );
                    *slot = Some(LiveConnection {
                        conn: conn.clone(),
                        generation,
                        created_at: Instant::now(),
                    });
                    return Ok(Lease { conn, generation });
                }
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.settings.backoff(attempt);
                    tracing::warn!(
                        db_id = %db_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connection attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(db_id = %db_id, attempts, error = %e, "Connection retries exhausted");
                    return Err(AppError::ConnectionFailed {
                        db_id: db_id.to_string(),
                        attempts,
                        source: e,
                    });
                }
            }
        }
    }

    /// Takes the connection of `db_id` out of its slot, provided it belongs
    /// to `generation` (any generation when `None`).
    async fn take(&self, db_id: &str, generation: Option<u64>) -> Option<LiveConnection<D::Conn>> {
        let slot = self.slots.lock().await.get(db_id).cloned()?;
        let mut guard = slot.lock().await;
        let owned = guard
            .as_ref()
            .is_some_and(|live| generation.map_or(true, |g| g == live.generation));
        if owned {
            guard.take()
        } else {
            None
        }
    }

    /// Force-closes and forgets the connection of `db_id`, if any.
    pub async fn invalidate(&self, db_id: &str) {
        if let Some(live) = self.take(db_id, None).await {
            self.driver.close(&live.conn).await;
            tracing::info!(db_id = %db_id, generation = live.generation, "Connection invalidated");
        }
    }

    /// Like [`PoolManager::invalidate`], but only while the slot still holds
    /// the connection of `generation`. A slot that was already refreshed is
    /// left alone.
    pub async fn invalidate_if(&self, db_id: &str, generation: u64) {
        match self.take(db_id, Some(generation)).await {
            Some(live) => {
                self.driver.close(&live.conn).await;
                tracing::info!(db_id = %db_id, generation, "Connection invalidated");
            }
            None => {
                tracing::debug!(db_id = %db_id, generation, "Connection already replaced");
            }
        }
    }

    /// Invalidates the connection of `db_id` and drops its slot.
    pub async fn remove(&self, db_id: &str) {
        self.invalidate(db_id).await;
        self.slots.lock().await.remove(db_id);
    }

    /// Closes every connection that is older than the configured age or
    /// reports itself as closed. Slots busy with another operation are
    /// skipped until the next sweep.
    ///
    /// # Returns
    /// The number of connections closed.
    pub async fn evict_stale(&self) -> usize {
        let slots: Vec<(String, Slot<D::Conn>)> = self
            .slots
            .lock()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut retired = Vec::new();
        for (db_id, slot) in slots {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if guard.as_ref().is_some_and(|live| self.is_stale(live)) {
                if let Some(live) = guard.take() {
                    retired.push((db_id, live));
                }
            }
        }

        for (db_id, live) in &retired {
            self.driver.close(&live.conn).await;
            tracing::info!(db_id = %db_id, generation = live.generation, "Stale connection evicted");
        }
        retired.len()
    }

    /// Whether a live connection is cached for `db_id`.
    pub async fn is_connected(&self, db_id: &str) -> bool {
        let slot = self.slots.lock().await.get(db_id).cloned();
        match slot {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Closes every cached connection.
    pub async fn close_all(&self) {
        let slots: Vec<(String, Slot<D::Conn>)> = self.slots.lock().await.drain().collect();
        for (db_id, slot) in slots {
            let live = slot.lock().await.take();
            if let Some(live) = live {
                self.driver.close(&live.conn).await;
                tracing::debug!(db_id = %db_id, "Connection closed");
            }
        }
    }
}
