//! [`TunnelRegistry`] — concurrent map from [`TunnelId`] to [`TunnelSlot`].
//!
//! The map sits behind its own `RwLock`, held only for insert, remove and
//! lookup. Tunnel state is guarded per slot, so operations on distinct
//! tunnels never contend. Lock order is map → slot (only [`remove`] checks
//! the phase under the map lock); nothing takes the map lock while holding
//! a slot.
//!
//! [`remove`]: TunnelRegistry::remove

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

// ---

use htun_domain::{BackendBridge, Phase, Result, TunnelError, TunnelId};

// ---

use super::{TunnelSlot, TunnelSlotPtr};

// ---------------------------------------------------------------------------
// TunnelRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TunnelRegistry {
    // ---
    tunnels: RwLock<HashMap<TunnelId, TunnelSlotPtr>>,
}

// ---

impl TunnelRegistry {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    // ---

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TunnelId, TunnelSlotPtr>> {
        self.tunnels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TunnelId, TunnelSlotPtr>> {
        self.tunnels.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ---

    /// An identifier not currently registered.
    fn allocate_id(&self) -> TunnelId {
        // ---
        let map = self.read();
        loop {
            let id = TunnelId::new_random();
            if !map.contains_key(&id) {
                return id;
            }
        }
    }

    // ---

    /// Allocate an identifier, connect the backend for it and register a
    /// new OPEN tunnel. Nothing is registered if the connect fails.
    pub async fn create(&self, bridge: &dyn BackendBridge) -> Result<TunnelId> {
        // ---
        let id = self.allocate_id();
        let handle = bridge.connect(id).await?;
        let slot = TunnelSlot::new(id, handle);

        let collided = match self.write().entry(id) {
            Entry::Vacant(v) => {
                v.insert(slot.clone());
                false
            }
            Entry::Occupied(_) => true,
        };

        if collided {
            // Another create raced us to the same id between allocate and insert.
            if let Err(e) = slot.lock().close() {
                tracing::warn!(%id, "teardown after id collision failed: {e}");
            }
            return Err(TunnelError::Backend(format!("tunnel id collision on {id}")));
        }

        Ok(id)
    }

    // ---

    pub fn get(&self, id: TunnelId) -> Result<TunnelSlotPtr> {
        // ---
        self.read()
            .get(&id)
            .cloned()
            .ok_or(TunnelError::NotFound(id))
    }

    // ---

    /// Remove and return `id` if it is registered and CLOSED; no-op otherwise.
    pub fn remove(&self, id: TunnelId) -> Option<TunnelSlotPtr> {
        // ---
        let mut map = self.write();
        let closed = map
            .get(&id)
            .is_some_and(|slot| slot.lock().phase() == Phase::Closed);

        if closed {
            map.remove(&id)
        } else {
            None
        }
    }

    // ---

    /// Close and remove every open tunnel idle for longer than `max_idle`.
    ///
    /// Each tunnel is locked before it is inspected, so a sweep never races
    /// a concurrent close. A tunnel with a suspended poll counts as active.
    /// Returns the evicted identifiers.
    pub fn sweep_idle(&self, max_idle: Duration) -> Vec<TunnelId> {
        // ---
        let now = Instant::now();
        let mut evicted = Vec::new();

        for slot in self.snapshot() {
            {
                let mut st = slot.lock();
                if !st.phase().is_open() || st.has_pending_poll() || st.idle_for(now) <= max_idle {
                    continue;
                }

                tracing::info!(
                    id = %slot.id(),
                    idle_ms = st.idle_for(now).as_millis() as u64,
                    "evicting idle tunnel",
                );
                if let Err(e) = st.close() {
                    tracing::warn!(id = %slot.id(), "idle teardown failed: {e}");
                }
            }

            self.remove(slot.id());
            evicted.push(slot.id());
        }

        evicted
    }

    // ---

    /// Close and remove every tunnel. Used on shutdown; pending polls are
    /// woken with whatever data remained.
    pub fn close_all(&self) -> usize {
        // ---
        let slots = self.snapshot();
        for slot in &slots {
            if let Err(e) = slot.lock().close() {
                tracing::warn!(id = %slot.id(), "teardown on shutdown failed: {e}");
            }
            self.remove(slot.id());
        }
        slots.len()
    }

    // ---

    /// Number of registered tunnels.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered identifiers, in no particular order.
    pub fn ids(&self) -> Vec<TunnelId> {
        self.read().keys().copied().collect()
    }

    // ---

    /// Clone every slot out from under a short-held read lock.
    fn snapshot(&self) -> Vec<TunnelSlotPtr> {
        self.read().values().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
