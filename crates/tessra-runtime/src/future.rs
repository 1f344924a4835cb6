//! Callback futures
//!
//! A [`Future`] is a shared slot that is set exactly once and observed many
//! times. Consumers either block on [`get`](Future::get) (user-side code
//! only), poll with [`probe`](Future::probe), or register a callback that
//! fires when the value arrives — the task graph is wired entirely through
//! callbacks, so pool workers never block on unready futures.
//!
//! Values are stored behind `Arc` so that chained futures share one
//! allocation. [`consume`](Future::consume) hands the value to its sole
//! consumer, moving it out when no other holder remains and falling back to
//! shared access otherwise; that uniqueness check is what the tile-op layer
//! uses as its runtime consumability flag.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tessra_core::error::{Error, Result};

type Callback = Box<dyn FnOnce() + Send>;

enum Slot<T> {
    Empty(Vec<Callback>),
    Ready(Arc<T>),
    Taken,
}

struct State<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

/// Single-assignment shared future
pub struct Future<T> {
    state: Arc<State<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumed future value: owned when this was the last holder
pub enum Consumed<T> {
    Own(T),
    Shared(Arc<T>),
}

impl<T> AsRef<T> for Consumed<T> {
    fn as_ref(&self) -> &T {
        match self {
            Consumed::Own(v) => v,
            Consumed::Shared(v) => v,
        }
    }
}

impl<T: Send + Sync + 'static> Future<T> {
    /// An unset future
    pub fn new() -> Self {
        Self {
            state: Arc::new(State {
                slot: Mutex::new(Slot::Empty(Vec::new())),
                cond: Condvar::new(),
            }),
        }
    }

    /// A future already holding `value`
    pub fn ready(value: T) -> Self {
        let f = Self::new();
        f.set(value).expect("fresh future accepts a value");
        f
    }

    /// True when the value has arrived
    pub fn probe(&self) -> bool {
        !matches!(*self.state.slot.lock(), Slot::Empty(_))
    }

    /// Set the value, waking waiters and firing callbacks
    ///
    /// Futures are single-assignment; a second set reports a
    /// consumability error and leaves the first value in place.
    pub fn set(&self, value: T) -> Result<()> {
        self.set_arc(Arc::new(value))
    }

    /// Set from an existing shared allocation (future-to-future chaining)
    pub fn set_arc(&self, value: Arc<T>) -> Result<()> {
        let callbacks = {
            let mut slot = self.state.slot.lock();
            match &mut *slot {
                Slot::Empty(cbs) => {
                    let cbs = std::mem::take(cbs);
                    *slot = Slot::Ready(value);
                    cbs
                }
                _ => {
                    return Err(Error::Consumability(
                        "future assigned more than once".to_string(),
                    ))
                }
            }
        };
        self.state.cond.notify_all();
        for cb in callbacks {
            cb();
        }
        Ok(())
    }

    /// Block until the value arrives and share it
    ///
    /// Only user-side code blocks here; pool tasks observe futures through
    /// callbacks. Panics if the value was moved out by a consumer, which
    /// indicates a future wired to more than one consuming reader.
    pub fn get(&self) -> Arc<T> {
        let mut slot = self.state.slot.lock();
        loop {
            match &*slot {
                Slot::Ready(v) => return v.clone(),
                Slot::Taken => panic!("future read after its value was consumed"),
                Slot::Empty(_) => self.state.cond.wait(&mut slot),
            }
        }
    }

    /// Block until the value arrives and consume it
    ///
    /// Moves the value out when this slot held the last reference,
    /// otherwise restores shared access and returns the shared handle.
    /// Consuming twice is a [`Error::Consumability`] error.
    pub fn consume(&self) -> Result<Consumed<T>> {
        let arc = {
            let mut slot = self.state.slot.lock();
            loop {
                match &*slot {
                    Slot::Ready(_) => break,
                    Slot::Taken => {
                        return Err(Error::Consumability(
                            "future consumed more than once".to_string(),
                        ))
                    }
                    Slot::Empty(_) => self.state.cond.wait(&mut slot),
                }
            }
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Ready(v) => v,
                _ => unreachable!("slot checked ready above"),
            }
        };
        match Arc::try_unwrap(arc) {
            Ok(value) => Ok(Consumed::Own(value)),
            Err(shared) => {
                // Another holder is alive: restore shared access
                *self.state.slot.lock() = Slot::Ready(shared.clone());
                Ok(Consumed::Shared(shared))
            }
        }
    }

    /// Run `callback` once the value is available
    ///
    /// Fires immediately (on the calling thread) when the value is already
    /// present; otherwise fires on the thread that sets the value.
    pub fn register_callback(&self, callback: Callback) {
        {
            let mut slot = self.state.slot.lock();
            if let Slot::Empty(cbs) = &mut *slot {
                cbs.push(callback);
                return;
            }
        }
        callback();
    }
}

/// Combine two futures into a future of their shared values
///
/// The result resolves when both inputs have resolved; each input counts
/// once toward the two-count readiness, mirroring pair reduction
/// arguments.
pub fn join2<L, R>(left: &Future<L>, right: &Future<R>) -> Future<(Arc<L>, Arc<R>)>
where
    L: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let out = Future::new();
    let pending = Arc::new(std::sync::atomic::AtomicUsize::new(2));
    for signal in 0..2 {
        let out = out.clone();
        let pending = pending.clone();
        let l = left.clone();
        let r = right.clone();
        let cb: Callback = Box::new(move || {
            if pending.fetch_sub(1, std::sync::atomic::Ordering::AcqRel) == 1 {
                out.set((l.get(), r.get()))
                    .expect("join slot set exactly once");
            }
        });
        if signal == 0 {
            left.register_callback(cb);
        } else {
            right.register_callback(cb);
        }
    }
    out
}
