use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use identity::TypeIdentity;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::descriptor::{FilterArgument, FilterDescriptor};
use crate::error::{DispatchError, DispatchResult};
use crate::filter::{Decoration, Filter, FilterCall};

/// Completed decorations of one packet, kept by the factory for time-shifted readers.
#[derive(Default)]
pub(crate) struct DecorationLog {
    entries: RwLock<HashMap<TypeIdentity, Decoration>>,
    // Later packets reading this log through a time shift.
    followers: Mutex<Vec<Weak<PacketInner>>>,
}

impl DecorationLog {
    pub(crate) fn get(&self, id: TypeIdentity) -> Option<Decoration> {
        self.entries.read().get(&id).cloned()
    }

    fn contains(&self, id: TypeIdentity) -> bool {
        self.entries.read().contains_key(&id)
    }

    fn record(&self, id: TypeIdentity, value: Decoration) -> bool {
        match self.entries.write().entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    fn follow(&self, packet: Weak<PacketInner>) {
        self.followers.lock().push(packet);
    }

    fn live_followers(&self) -> Vec<Arc<PacketInner>> {
        let mut followers = self.followers.lock();
        followers.retain(|follower| follower.strong_count() > 0);
        followers.iter().filter_map(Weak::upgrade).collect()
    }
}

/// Logs of earlier packets, one per registered time shift.
pub(crate) type Predecessors = SmallVec<[(u32, Arc<DecorationLog>); 4]>;

struct PacketState {
    decorations: HashMap<TypeIdentity, Decoration>,
    fired: Vec<bool>,
}

pub(crate) struct PacketInner {
    sequence: u64,
    filters: Arc<Vec<Filter>>,
    // `(k, log)` holds the log of the packet issued `k` positions earlier.
    predecessors: Predecessors,
    log: Arc<DecorationLog>,
    state: Mutex<PacketState>,
}

/// Unit of work carrying typed decorations through the registered filters.
///
/// Decorating a packet runs every filter whose inputs become satisfied, each
/// at most once, in registration order. Calls on one packet are serialized;
/// filter bodies run while the packet is locked and must supply their results
/// through [`FilterCall::put`] rather than decorating the packet themselves.
#[derive(Clone)]
pub struct Packet {
    pub(crate) inner: Arc<PacketInner>,
}

impl Packet {
    pub(crate) fn new(
        sequence: u64,
        filters: Arc<Vec<Filter>>,
        predecessors: Predecessors,
        log: Arc<DecorationLog>,
    ) -> Self {
        let fired = vec![false; filters.len()];
        let inner = Arc::new(PacketInner {
            sequence,
            filters,
            predecessors,
            log,
            state: Mutex::new(PacketState {
                decorations: HashMap::new(),
                fired,
            }),
        });
        for (_, log) in &inner.predecessors {
            log.follow(Arc::downgrade(&inner));
        }
        Self { inner }
    }

    /// Position in the issuing factory's sequence, starting at zero.
    pub fn sequence(&self) -> u64 {
        self.inner.sequence
    }

    /// Attaches `value` and runs every filter it unblocks.
    ///
    /// Fails with [`DispatchError::DuplicateDecoration`] without touching the
    /// packet when `T` is already attached. Filter failures do not stop the
    /// propagation; the first one is returned once no filter can make progress.
    /// Later packets waiting on this one through a time shift are dispatched
    /// again before returning.
    pub fn decorate<T: Send + Sync + 'static>(&self, value: T) -> DispatchResult<()> {
        self.decorate_arc(Arc::new(value))
    }

    pub fn decorate_arc<T: Send + Sync + 'static>(&self, value: Arc<T>) -> DispatchResult<()> {
        let id = TypeIdentity::of::<T>();
        let (result, published) = {
            let mut state = self.inner.state.lock();
            if state.decorations.contains_key(&id) {
                return Err(self.duplicate(id));
            }
            trace!(packet = self.sequence(), decoration = %id, "decorated");
            state.decorations.insert(id, value);
            self.inner.dispatch(&mut state)
        };
        if published {
            self.inner.wake_followers();
        }
        result
    }

    /// Runs filters that are ready without any new decoration.
    pub(crate) fn dispatch_ready(&self) -> DispatchResult<()> {
        let (result, published) = self.inner.dispatch_locked();
        if published {
            self.inner.wake_followers();
        }
        result
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let value = self
            .inner
            .state
            .lock()
            .decorations
            .get(&TypeIdentity::of::<T>())
            .cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn has<T: Send + Sync + 'static>(&self) -> bool {
        self.inner
            .state
            .lock()
            .decorations
            .contains_key(&TypeIdentity::of::<T>())
    }

    /// Attached decoration types, ordered by identity.
    pub fn decoration_types(&self) -> Vec<TypeIdentity> {
        let mut types: Vec<TypeIdentity> =
            self.inner.state.lock().decorations.keys().copied().collect();
        types.sort();
        types
    }

    /// Filters already invoked on this packet, in registration order.
    pub fn fired_filters(&self) -> Vec<FilterDescriptor> {
        self.filters_where(true)
    }

    /// Filters not yet invoked, either waiting on inputs or permanently blocked.
    pub fn pending_filters(&self) -> Vec<FilterDescriptor> {
        self.filters_where(false)
    }

    fn filters_where(&self, fired: bool) -> Vec<FilterDescriptor> {
        let state = self.inner.state.lock();
        self.inner
            .filters
            .iter()
            .zip(&state.fired)
            .filter(|(_, done)| **done == fired)
            .map(|(filter, _)| filter.descriptor().clone())
            .collect()
    }

    fn duplicate(&self, id: TypeIdentity) -> DispatchError {
        self.inner.duplicate(id)
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("sequence", &self.sequence())
            .field("decorations", &self.decoration_types())
            .finish()
    }
}

impl PacketInner {
    fn duplicate(&self, id: TypeIdentity) -> DispatchError {
        DispatchError::DuplicateDecoration {
            decoration: id.display_name(),
            packet: self.sequence,
        }
    }

    fn dispatch_locked(&self) -> (DispatchResult<()>, bool) {
        let mut state = self.state.lock();
        self.dispatch(&mut state)
    }

    /// Re-dispatches every live packet that reads a newly published value.
    ///
    /// Runs with no packet locked; followers are always later in sequence.
    fn wake_followers(&self) {
        let mut woken = self.log.live_followers();
        while let Some(packet) = woken.pop() {
            let (result, published) = packet.dispatch_locked();
            if let Err(err) = result {
                debug!(packet = packet.sequence, error = %err, "deferred dispatch failed");
            }
            if published {
                woken.extend(packet.log.live_followers());
            }
        }
    }

    // Returns the first failure and whether the log gained a value.
    fn dispatch(&self, state: &mut PacketState) -> (DispatchResult<()>, bool) {
        let mut first_error = None;
        let mut published = false;
        loop {
            published |= self.publish(state);
            let ready = (0..self.filters.len()).find(|&index| self.is_ready(index, state));
            let Some(index) = ready else {
                break;
            };
            state.fired[index] = true;

            if let Err(err) = self.fire(&self.filters[index], state) {
                first_error.get_or_insert(err);
            }
        }
        (first_error.map_or(Ok(()), Err), published)
    }

    fn fire(&self, filter: &Filter, state: &mut PacketState) -> DispatchResult<()> {
        let descriptor = filter.descriptor();
        let inputs = descriptor
            .inputs()
            .filter_map(|arg| self.resolve(arg, state).map(|value| (*arg, value)))
            .collect();

        trace!(packet = self.sequence, filter = %descriptor.name(), "filter fired");
        let mut call = FilterCall::new(descriptor, self.sequence, inputs);
        if let Err(err) = filter.invoke(&mut call) {
            warn!(packet = self.sequence, filter = %descriptor.name(), error = %err, "filter failed");
            return Err(DispatchError::FilterFailed {
                filter: descriptor.name(),
                reason: format!("{err:#}"),
            });
        }

        let mut result = Ok(());
        for (id, value) in call.into_outputs() {
            let replaces = descriptor.argument(id).is_some_and(|arg| arg.is_rvalue);
            if !replaces && state.decorations.contains_key(&id) {
                if result.is_ok() {
                    result = Err(self.duplicate(id));
                }
                continue;
            }
            state.decorations.insert(id, value);
        }
        result
    }

    fn resolve(&self, arg: &FilterArgument, state: &PacketState) -> Option<Decoration> {
        if arg.time_shift == 0 {
            return state.decorations.get(&arg.id).cloned();
        }
        self.predecessor(arg.time_shift)?.get(arg.id)
    }

    fn predecessor(&self, shift: u32) -> Option<&DecorationLog> {
        self.predecessors
            .iter()
            .find(|(back, _)| *back == shift)
            .map(|(_, log)| log.as_ref())
    }

    fn is_ready(&self, index: usize, state: &PacketState) -> bool {
        if state.fired[index] {
            return false;
        }
        self.filters[index]
            .descriptor()
            .inputs()
            .all(|arg| self.input_ready(index, arg, state))
    }

    fn input_ready(&self, index: usize, arg: &FilterArgument, state: &PacketState) -> bool {
        if arg.is_shifted() {
            return self
                .predecessor(arg.time_shift)
                .is_some_and(|log| log.contains(arg.id));
        }
        if !state.decorations.contains_key(&arg.id) {
            return false;
        }
        // In/out filters on one type run in registration order; plain
        // readers wait for all of them.
        let transformers_before = if arg.is_rvalue { index } else { self.filters.len() };
        self.filters[..transformers_before]
            .iter()
            .zip(&state.fired)
            .all(|(filter, &fired)| fired || !filter.descriptor().transforms(arg.id))
    }

    fn is_complete(&self, id: TypeIdentity, state: &PacketState) -> bool {
        state.decorations.contains_key(&id)
            && self
                .filters
                .iter()
                .zip(&state.fired)
                .all(|(filter, &fired)| fired || !filter.descriptor().transforms(id))
    }

    fn publish(&self, state: &PacketState) -> bool {
        let mut recorded = false;
        for (id, value) in &state.decorations {
            if !self.log.contains(*id) && self.is_complete(*id, state) {
                recorded |= self.log.record(*id, Arc::clone(value));
            }
        }
        recorded
    }
}
