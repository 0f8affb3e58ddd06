use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use trellis_engine_core::api::{DynGateway, JobDescriptor};
use trellis_engine_core::value::{Block, Value};
use trellis_engine_core::{Didentifier, Fidentifier};

/// Outcome of admitting a submit against the result cache
pub enum Admission {
    /// No previous state; the job was admitted and marked in flight
    Admitted,
    /// An identical job is currently in flight cluster-wide
    InFlight,
    /// The job completed earlier and the dataset has not changed since
    Cached(Value),
}

struct JobSlot {
    partial: Option<Value>,
    in_flight: bool,
    /// Peer partials absorbed into `partial` so far
    combines: usize,
    /// Present only on the node that admitted the submit
    gateway: Option<DynGateway>,
    /// Signals availability of the local partial to reduction hops
    ready: watch::Sender<bool>,
    /// Serializes compute/combine cycles of this job on this node
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl JobSlot {
    fn new(gateway: Option<DynGateway>) -> Self {
        let (ready, _) = watch::channel(false);
        Self { partial: None, in_flight: true, combines: 0, gateway, ready, lock: Arc::new(tokio::sync::Mutex::new(())) }
    }
}

/// In-memory result cache: one slot per `(dataset, job)` pair.
///
/// Never persisted; an engine restart only retains raw blocks and existence
/// flags.
#[derive(Default)]
pub struct ResultCache {
    slots: Mutex<HashMap<(Didentifier, Fidentifier), JobSlot>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, didentifier: Didentifier, fidentifier: Fidentifier, gateway: DynGateway) -> Admission {
        let mut slots = self.slots.lock();
        match slots.entry((didentifier, fidentifier)) {
            Entry::Occupied(entry) => {
                let slot = entry.get();
                if slot.in_flight {
                    Admission::InFlight
                } else {
                    Admission::Cached(slot.partial.clone().unwrap_or(Value::Null))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(JobSlot::new(Some(gateway)));
                Admission::Admitted
            }
        }
    }

    fn with_slot<T>(&self, didentifier: Didentifier, fidentifier: Fidentifier, f: impl FnOnce(&mut JobSlot) -> T) -> T {
        let mut slots = self.slots.lock();
        let slot = slots.entry((didentifier, fidentifier)).or_insert_with(|| JobSlot::new(None));
        f(slot)
    }

    /// The per-job execution lock, creating the slot when a peer-driven
    /// execution reaches a node that never saw the submit
    pub fn job_lock(&self, didentifier: Didentifier, fidentifier: Fidentifier) -> Arc<tokio::sync::Mutex<()>> {
        self.with_slot(didentifier, fidentifier, |slot| slot.lock.clone())
    }

    pub fn subscribe_ready(&self, didentifier: Didentifier, fidentifier: Fidentifier) -> watch::Receiver<bool> {
        self.with_slot(didentifier, fidentifier, |slot| slot.ready.subscribe())
    }

    pub fn partial(&self, didentifier: Didentifier, fidentifier: Fidentifier) -> Option<Value> {
        self.slots.lock().get(&(didentifier, fidentifier)).and_then(|slot| slot.partial.clone())
    }

    pub fn store_partial(&self, didentifier: Didentifier, fidentifier: Fidentifier, value: Value) {
        self.with_slot(didentifier, fidentifier, |slot| {
            slot.partial = Some(value);
            let _ = slot.ready.send_replace(true);
        });
    }

    /// Forgets a cached partial so the next execution recomputes it (a fresh
    /// ghost exchange supersedes any previous local result)
    pub fn reset_partial(&self, didentifier: Didentifier, fidentifier: Fidentifier) {
        self.with_slot(didentifier, fidentifier, |slot| {
            slot.partial = None;
            slot.combines = 0;
            let _ = slot.ready.send_replace(false);
        });
    }

    /// Counts one absorbed peer partial and reports the new total
    pub fn record_combine(&self, didentifier: Didentifier, fidentifier: Fidentifier) -> usize {
        self.with_slot(didentifier, fidentifier, |slot| {
            slot.combines += 1;
            slot.combines
        })
    }

    pub fn combines(&self, didentifier: Didentifier, fidentifier: Fidentifier) -> usize {
        self.slots.lock().get(&(didentifier, fidentifier)).map(|slot| slot.combines).unwrap_or(0)
    }

    /// Marks the job finished, keeping the final value for duplicate submits
    pub fn complete(&self, didentifier: Didentifier, fidentifier: Fidentifier) -> Option<DynGateway> {
        let mut slots = self.slots.lock();
        slots.get_mut(&(didentifier, fidentifier)).and_then(|slot| {
            slot.in_flight = false;
            slot.gateway.clone()
        })
    }

    /// Drops the slot (admission rollback, abort), handing back the gateway
    /// for failure reporting
    pub fn remove(&self, didentifier: Didentifier, fidentifier: Fidentifier) -> Option<DynGateway> {
        self.slots.lock().remove(&(didentifier, fidentifier)).and_then(|slot| slot.gateway)
    }

    /// Drops the slot only when the job is still in flight (watchdog path)
    pub fn remove_if_in_flight(&self, didentifier: Didentifier, fidentifier: Fidentifier) -> Option<DynGateway> {
        let mut slots = self.slots.lock();
        match slots.entry((didentifier, fidentifier)) {
            Entry::Occupied(entry) if entry.get().in_flight => entry.remove().gateway,
            _ => None,
        }
    }

    /// Appends invalidate every cached job under the dataset
    pub fn invalidate_dataset(&self, didentifier: Didentifier) {
        self.slots.lock().retain(|(d, _), _| *d != didentifier);
    }

    pub fn descriptors(&self, is_internal: bool) -> Vec<JobDescriptor> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| is_internal || slot.gateway.is_some())
            .map(|((didentifier, fidentifier), slot)| JobDescriptor {
                didentifier: *didentifier,
                fidentifier: *fidentifier,
                in_flight: slot.in_flight,
                submitted_here: slot.gateway.is_some(),
            })
            .collect()
    }
}

/// One job's ghost context: per-block slices received from the ring neighbors
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GhostEntry {
    pub left: Option<Vec<Option<Block>>>,
    pub right: Option<Vec<Option<Block>>>,
}

#[derive(Default)]
struct GhostSlot {
    entry: GhostEntry,
    started: bool,
}

/// In-memory ghost cache, keyed by job id. Each side has a single producer
/// (the matching neighbor) and the execute path is the single consumer.
#[derive(Default)]
pub struct GhostCache {
    slots: Mutex<HashMap<Fidentifier, GhostSlot>>,
}

impl GhostCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the non-null sides and reports whether execution should start:
    /// immediately unless both sides are required and one is still missing.
    /// Only the depositing call that completes the gate reports `true`.
    pub fn deposit(
        &self,
        fidentifier: Fidentifier,
        left: Option<Vec<Option<Block>>>,
        right: Option<Vec<Option<Block>>>,
        needs_both: bool,
    ) -> bool {
        let mut slots = self.slots.lock();
        let slot = slots.entry(fidentifier).or_default();
        if left.is_some() {
            slot.entry.left = left;
        }
        if right.is_some() {
            slot.entry.right = right;
        }
        if slot.started {
            return false;
        }
        let complete = !needs_both || (slot.entry.left.is_some() && slot.entry.right.is_some());
        if complete {
            slot.started = true;
        }
        complete
    }

    /// Consumed exactly once when execution starts
    pub fn take(&self, fidentifier: Fidentifier) -> Option<GhostEntry> {
        self.slots.lock().remove(&fidentifier).map(|slot| slot.entry)
    }
}
