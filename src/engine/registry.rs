//! Slot arena for native completion callbacks.
//!
//! Native callbacks never hold a pointer to an overlay. They hold a [`CompletionSink`],
//! which names a slot by overlay id and generation and re-resolves it on every post. When
//! an overlay tears its view down it releases the slot first; anything the engine delivers
//! afterwards is dropped here instead of reaching freed state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lazy_static::lazy_static;
use tokio::sync::mpsc;

use crate::engine::events::BackendMessage;
use crate::engine::overlay::OverlayId;

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<SlotRegistry> = Arc::new(SlotRegistry::new());
}

/// Stable address of one occupancy of an overlay's slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub overlay: OverlayId,
    pub generation: u64,
}

struct Slot {
    generation: u64,
    tx: Option<mpsc::UnboundedSender<BackendMessage>>,
}

#[derive(Default)]
pub struct SlotRegistry {
    slots: Mutex<HashMap<OverlayId, Slot>>,
}

impl std::fmt::Debug for SlotRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotRegistry")
            .field("slots", &self.lock().len())
            .finish()
    }
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by overlays that don't bring their own.
    pub fn global() -> Arc<SlotRegistry> {
        GLOBAL_REGISTRY.clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OverlayId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Occupies the overlay's slot with a fresh generation and returns the receiving end.
    ///
    /// Any earlier occupancy is invalidated: its sinks stop delivering.
    pub fn occupy(&self, overlay: OverlayId) -> (SlotKey, mpsc::UnboundedReceiver<BackendMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slots = self.lock();
        let slot = slots.entry(overlay).or_insert(Slot {
            generation: 0,
            tx: None,
        });
        slot.generation += 1;
        slot.tx = Some(tx);

        (
            SlotKey {
                overlay,
                generation: slot.generation,
            },
            rx,
        )
    }

    /// Clears the slot if `key` is still its current occupancy. Returns whether it was.
    pub fn release(&self, key: SlotKey) -> bool {
        let mut slots = self.lock();
        match slots.get_mut(&key.overlay) {
            Some(slot) if slot.generation == key.generation && slot.tx.is_some() => {
                slot.tx = None;
                true
            }
            _ => false,
        }
    }

    /// Forgets the overlay entirely.
    pub fn remove(&self, overlay: OverlayId) {
        self.lock().remove(&overlay);
    }

    pub fn is_live(&self, key: SlotKey) -> bool {
        self.lock()
            .get(&key.overlay)
            .map(|slot| slot.generation == key.generation && slot.tx.is_some())
            .unwrap_or(false)
    }

    /// Delivers `msg` to the slot named by `key`. Returns `false`, dropping the message,
    /// when the slot was released or re-occupied since.
    pub fn post(&self, key: SlotKey, msg: BackendMessage) -> bool {
        let slots = self.lock();
        let Some(slot) = slots.get(&key.overlay) else {
            return false;
        };
        if slot.generation != key.generation {
            return false;
        }
        match &slot.tx {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }
}

/// Handle given to native callbacks to report back into an overlay.
#[derive(Clone)]
pub struct CompletionSink {
    key: SlotKey,
    registry: Arc<SlotRegistry>,
}

impl std::fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSink").field("key", &self.key).finish()
    }
}

impl CompletionSink {
    pub fn new(key: SlotKey, registry: Arc<SlotRegistry>) -> Self {
        Self { key, registry }
    }

    pub fn key(&self) -> SlotKey {
        self.key
    }

    pub fn is_live(&self) -> bool {
        self.registry.is_live(self.key)
    }

    pub fn post(&self, msg: BackendMessage) -> bool {
        let delivered = self.registry.post(self.key, msg);
        if !delivered {
            log::debug!("Overlay[{:?}]: dropped message for released slot", self.key.overlay);
        }
        delivered
    }
}
