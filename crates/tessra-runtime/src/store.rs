//! Distributed ordinal-keyed future stores
//!
//! A [`DistStore`] is the tile container behind arrays and evaluators: a
//! concurrent map from tile ordinal to [`Future`] of the tile value,
//! registered with the communicator under a program-order id so that every
//! rank addressing the same logical container reaches the same slots.
//!
//! Slots are created on first touch and assigned exactly once per
//! evaluation. [`get`](DistStore::get) never blocks: a reader of a tile
//! that has not arrived yet (typically a remote tile) receives a future
//! that resolves when the owner assigns it.

use crate::comm::SharedAny;
use crate::future::Future;
use crate::world::World;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// Distributed map from tile ordinal to value future
pub struct DistStore<V: Send + Sync + 'static> {
    id: u64,
    map: Arc<DashMap<usize, Future<V>>>,
}

impl<V: Send + Sync + 'static> Clone for DistStore<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            map: self.map.clone(),
        }
    }
}

impl<V: Send + Sync + 'static> DistStore<V> {
    /// Register a fresh store on the world's communicator
    ///
    /// Collectively allocates the next program-order id; every rank must
    /// construct its stores in the same order.
    pub fn new(world: &World) -> Self {
        let id = world.next_id();
        let shared = world
            .comm()
            .shared_state(id, &|| Arc::new(DashMap::<usize, Future<V>>::new()) as SharedAny);
        let map = shared
            .downcast::<DashMap<usize, Future<V>>>()
            .expect("store id resolves to a matching container");
        Self { id, map }
    }

    /// The container's id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The future for `ordinal`, created unset on first touch
    pub fn get(&self, ordinal: usize) -> Future<V> {
        self.map
            .entry(ordinal)
            .or_insert_with(Future::new)
            .clone()
    }

    /// Assign `ordinal` from a value future
    ///
    /// Chains without copying the payload. Assigning a slot twice is a
    /// consumability error recorded on the world.
    pub fn set(&self, world: &World, ordinal: usize, value: Future<V>) {
        let slot = self.get(ordinal);
        let world = world.clone();
        let source = value.clone();
        value.register_callback(Box::new(move || {
            if let Err(e) = slot.set_arc(source.get()) {
                world.record_error(e);
            }
        }));
    }

    /// Assign `ordinal` directly from a value
    pub fn set_value(&self, world: &World, ordinal: usize, value: V) {
        let slot = self.get(ordinal);
        if let Err(e) = slot.set(value) {
            world.record_error(e);
        }
    }

    /// Number of touched slots on this rank's view
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no slot has been touched
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop every slot (used when an array is overwritten)
    pub fn clear(&self) {
        trace!(id = self.id, "clearing store");
        self.map.clear();
    }
}
