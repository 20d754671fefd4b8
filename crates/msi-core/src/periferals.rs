// ── Periferals ──
//
// Locally mirrored list of tracked entities (vehicles, premises) kept in
// step with the widget's periferals layer. Mutations apply locally first,
// then round-trip to the widget; each acknowledged mutation is broadcast
// on the controller's stream together with the full list.
//
// A mutation that times out or is rejected stays applied locally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use msi_api::channel::{Channel, request};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{Entity, LivePosition};
use crate::stream::{Stream, lock};

pub mod event {
    pub const SHOW: &str = "show:periferals";
    pub const ADD_ENTITY: &str = "add:periferal:entity";
    pub const REMOVE_ENTITY: &str = "remove:periferal:entity";
    pub const MOVE_ENTITY: &str = "move:periferal:entity";
    pub const CLEAR: &str = "remove:periferals";
}

/// What an acknowledged mutation changed.
#[derive(Debug, Clone, PartialEq)]
pub enum PeriferalChange {
    Added(Entity),
    Removed { id: String },
    Moved(LivePosition),
}

impl PeriferalChange {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Added(_) => "add",
            Self::Removed { .. } => "remove",
            Self::Moved(_) => "move",
        }
    }
}

/// Broadcast after every acknowledged mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriferalUpdate {
    pub change: PeriferalChange,
    pub list: Vec<Entity>,
}

struct Inner {
    channel: Arc<dyn Channel>,
    timeout: Duration,
    entities: Mutex<Vec<Entity>>,
    closed: AtomicBool,
    /// Held while a clear is in flight.
    closing: AtomicBool,
    stream: Stream<PeriferalUpdate>,
}

impl Inner {
    async fn acknowledged(&self, event: &str, payload: Value, operation: &str) -> Result<(), CoreError> {
        match request(self.channel.as_ref(), event, Some(payload), self.timeout).await {
            Ok(_) => Ok(()),
            Err(msi_api::Error::Timeout { .. }) => Err(CoreError::timeout(operation, self.timeout)),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_remote(&self) -> Result<(), CoreError> {
        match request(self.channel.as_ref(), event::CLEAR, None, self.timeout).await {
            Ok(_) => Ok(()),
            Err(msi_api::Error::Timeout { .. }) => Err(CoreError::timeout("Clear periferals", self.timeout)),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim the right to clear the widget layer. Only one caller wins
    /// until the claim is released.
    fn begin_close(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self
                .closing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    fn finish_close(&self, cleared: bool) {
        if cleared {
            self.closed.store(true, Ordering::Release);
        }
        self.closing.store(false, Ordering::Release);
    }

    fn broadcast(&self, change: PeriferalChange) {
        let list = lock(&self.entities).clone();
        self.stream.sync(&PeriferalUpdate { change, list });
    }
}

/// Controller for one periferals layer. Clones share the same list.
#[derive(Clone)]
pub struct Periferals {
    inner: Arc<Inner>,
}

impl Periferals {
    /// Show `list` on the widget and start mirroring it. Duplicate ids in
    /// `list` collapse to the last occurrence.
    pub fn open(channel: Arc<dyn Channel>, list: Vec<Entity>, timeout: Duration) -> Self {
        let mut entities: Vec<Entity> = Vec::with_capacity(list.len());
        for entity in list {
            entities.retain(|e| e.id != entity.id);
            entities.push(entity);
        }

        match serde_json::to_value(&entities) {
            Ok(payload) => channel.emit(event::SHOW, Some(payload), None),
            Err(e) => warn!(error = %e, "Failed to encode periferals list"),
        }

        let inner = Arc::new(Inner {
            channel,
            timeout,
            entities: Mutex::new(entities),
            closed: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            stream: Stream::new(),
        });

        // Closing the stream directly (or through an upstream pipe) still
        // clears the widget layer.
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner.stream.on_close(move || {
            let Some(inner) = weak.upgrade() else { return };
            if !inner.begin_close() {
                return;
            }
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                warn!("No runtime to clear periferals on close");
                inner.finish_close(false);
                return;
            };
            runtime.spawn(async move {
                let cleared = inner.clear_remote().await;
                if let Err(e) = &cleared {
                    warn!(error = %e, "Failed to clear periferals");
                }
                inner.finish_close(cleared.is_ok());
            });
        });

        Self { inner }
    }

    /// Snapshot of the mirrored list.
    pub fn entities(&self) -> Vec<Entity> {
        lock(&self.inner.entities).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The mutation broadcast.
    pub fn stream(&self) -> Stream<PeriferalUpdate> {
        self.inner.stream.clone()
    }

    /// Hand the controller to `f`, then return the broadcast stream.
    pub fn live(&self, f: impl FnOnce(&Self)) -> Stream<PeriferalUpdate> {
        f(self);
        self.stream()
    }

    /// Add `entity`, replacing any entity with the same id.
    pub async fn add(&self, entity: Entity) -> Result<(), CoreError> {
        if self.is_closed() {
            debug!(id = %entity.id, "Periferals closed, add ignored");
            return Ok(());
        }

        let evicted = {
            let mut list = lock(&self.inner.entities);
            let before = list.len();
            list.retain(|e| e.id != entity.id);
            let evicted = list.len() != before;
            list.push(entity.clone());
            evicted
        };
        if evicted {
            self.inner
                .channel
                .emit(event::REMOVE_ENTITY, Some(json!(entity.id)), None);
        }

        let payload = serde_json::to_value(&entity).map_err(|e| CoreError::Internal(e.to_string()))?;
        self.inner
            .acknowledged(event::ADD_ENTITY, payload, "Add entity")
            .await?;
        self.inner.broadcast(PeriferalChange::Added(entity));
        Ok(())
    }

    /// Remove the entity with `id`.
    pub async fn remove(&self, id: &str) -> Result<(), CoreError> {
        if self.is_closed() {
            debug!(id, "Periferals closed, remove ignored");
            return Ok(());
        }

        lock(&self.inner.entities).retain(|e| e.id != id);
        self.inner
            .acknowledged(event::REMOVE_ENTITY, json!(id), "Remove entity")
            .await?;
        self.inner.broadcast(PeriferalChange::Removed { id: id.to_owned() });
        Ok(())
    }

    /// Move a mobile entity.
    pub async fn move_entity(&self, update: LivePosition) -> Result<(), CoreError> {
        if self.is_closed() {
            debug!(id = %update.id, "Periferals closed, move ignored");
            return Ok(());
        }

        if let Some(entity) = lock(&self.inner.entities)
            .iter_mut()
            .find(|e| e.id == update.id)
        {
            entity.position = update.position;
            if update.caption.is_some() {
                entity.caption.clone_from(&update.caption);
            }
        }

        let payload = serde_json::to_value(&update).map_err(|e| CoreError::Internal(e.to_string()))?;
        self.inner
            .acknowledged(event::MOVE_ENTITY, payload, "Move entity")
            .await?;
        self.inner.broadcast(PeriferalChange::Moved(update));
        Ok(())
    }

    /// Clear the widget layer, then close the stream. On a remote error
    /// the controller stays open. Repeat calls do nothing.
    pub async fn close(&self) -> Result<(), CoreError> {
        if !self.inner.begin_close() {
            return Ok(());
        }
        let cleared = self.inner.clear_remote().await;
        self.inner.finish_close(cleared.is_ok());
        cleared?;
        self.inner.stream.close();
        Ok(())
    }
}

impl std::fmt::Debug for Periferals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Periferals")
            .field("entities", &lock(&self.inner.entities).len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
