use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use context::{Context, ContextError};
use parking_lot::Mutex;
use smallvec::SmallVec;
use runnable::{Lifecycle, Runnable, RunnableResult};
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};
use crate::filter::{AutoFilter, Filter};
use crate::packet::{DecorationLog, Packet, PacketInner, Predecessors};
use crate::registry::FilterRegistry;

/// Settings for a [`PacketFactory`].
#[derive(Clone, Debug, Default)]
pub struct FactoryConfig {
    /// Completed packets kept for time-shifted readers, at minimum.
    pub min_history: usize,
}

struct Sequencer {
    next: u64,
    // Most recent first.
    history: VecDeque<Arc<DecorationLog>>,
}

/// Issues packets against one [`FilterRegistry`], in FIFO sequence.
///
/// The factory is a passive [`Runnable`]: starting it freezes the registry and
/// stopping it refuses further packets.
pub struct PacketFactory {
    lifecycle: Lifecycle,
    registry: FilterRegistry,
    config: FactoryConfig,
    sequencer: Mutex<Sequencer>,
    current: Mutex<Weak<PacketInner>>,
}

impl Default for PacketFactory {
    fn default() -> Self {
        Self::new(FactoryConfig::default())
    }
}

impl PacketFactory {
    pub fn new(config: FactoryConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            registry: FilterRegistry::new(),
            config,
            sequencer: Mutex::new(Sequencer {
                next: 0,
                history: VecDeque::new(),
            }),
            current: Mutex::new(Weak::new()),
        }
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn register(&self, filter: Filter) -> DispatchResult<()> {
        self.registry.register(filter)
    }

    /// Predecessor packets each new packet can see.
    pub fn history_depth(&self) -> usize {
        let shift = usize::try_from(self.registry.max_time_shift()).unwrap_or(usize::MAX);
        self.config.min_history.max(shift)
    }

    /// Issues the next packet and fires every filter that needs no decoration.
    pub fn new_packet(&self) -> DispatchResult<Packet> {
        if self.lifecycle.should_stop() {
            return Err(DispatchError::FactoryStopped);
        }

        let filters = self.registry.snapshot();
        let shifts = time_shifts(&filters);
        let depth = self.history_depth();
        let packet = {
            let mut sequencer = self.sequencer.lock();
            let sequence = sequencer.next;
            sequencer.next += 1;

            let predecessors: Predecessors = shifts
                .iter()
                .filter_map(|&shift| {
                    let back = usize::try_from(shift).ok()?.checked_sub(1)?;
                    let log = sequencer.history.get(back)?;
                    Some((shift, Arc::clone(log)))
                })
                .collect();
            let log = Arc::new(DecorationLog::default());
            sequencer.history.push_front(Arc::clone(&log));
            sequencer.history.truncate(depth);

            Packet::new(sequence, filters, predecessors, log)
        };
        *self.current.lock() = Arc::downgrade(&packet.inner);

        packet.dispatch_ready()?;
        Ok(packet)
    }

    /// Most recently issued packet, while someone still holds it.
    pub fn current_packet(&self) -> Option<Packet> {
        self.current.lock().upgrade().map(|inner| Packet { inner })
    }

    /// Number of packets issued so far.
    pub fn issued(&self) -> u64 {
        self.sequencer.lock().next
    }
}

impl Runnable for PacketFactory {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn name(&self) -> &str {
        "PacketFactory"
    }

    fn start(&self) -> RunnableResult<bool> {
        if !self.lifecycle.begin() {
            return Ok(false);
        }
        self.registry.freeze();
        self.lifecycle.enter_running();
        debug!(filters = self.registry.len(), "packet factory started");
        Ok(true)
    }

    fn stop(&self) {
        if self.lifecycle.stop() {
            self.sequencer.lock().history.clear();
            debug!(issued = self.issued(), "packet factory stopped");
        }
    }
}

/// Packet-factory access on a [`Context`].
pub trait ContextDispatchExt {
    /// This context's factory, installed with defaults on first use.
    fn packet_factory(&self) -> DispatchResult<Arc<PacketFactory>>;

    /// Nearest factory in this context or an ancestor.
    fn find_packet_factory(&self) -> Option<Arc<PacketFactory>>;

    fn install_packet_factory(&self, config: FactoryConfig) -> DispatchResult<Arc<PacketFactory>>;

    fn register_filter(&self, filter: Filter) -> DispatchResult<()>;

    /// Injects `component` as a member and registers it as a filter.
    fn inject_filter<C: AutoFilter>(&self, component: C) -> DispatchResult<Arc<C>>;

    fn new_packet(&self) -> DispatchResult<Packet>;
}

impl ContextDispatchExt for Context {
    fn packet_factory(&self) -> DispatchResult<Arc<PacketFactory>> {
        if let Some(factory) = self.resolve_local::<PacketFactory>() {
            return Ok(factory);
        }
        match self.install_packet_factory(FactoryConfig::default()) {
            Err(DispatchError::Context(ContextError::DuplicateMember { .. })) => self
                .resolve_local::<PacketFactory>()
                .ok_or_else(|| self_torn_down(self)),
            other => other,
        }
    }

    fn find_packet_factory(&self) -> Option<Arc<PacketFactory>> {
        self.resolve::<PacketFactory>()
    }

    fn install_packet_factory(&self, config: FactoryConfig) -> DispatchResult<Arc<PacketFactory>> {
        let factory = self.add_runnable(PacketFactory::new(config))?;
        debug!(context = %self.name(), "packet factory installed");
        Ok(factory)
    }

    fn register_filter(&self, filter: Filter) -> DispatchResult<()> {
        self.packet_factory()?.register(filter)
    }

    fn inject_filter<C: AutoFilter>(&self, component: C) -> DispatchResult<Arc<C>> {
        let component = self.inject(component)?;
        self.register_filter(Filter::from_component(Arc::clone(&component))?)?;
        Ok(component)
    }

    fn new_packet(&self) -> DispatchResult<Packet> {
        self.packet_factory()?.new_packet()
    }
}

/// Distinct time shifts read by `filters`, ascending.
fn time_shifts(filters: &[Filter]) -> SmallVec<[u32; 4]> {
    let mut shifts: SmallVec<[u32; 4]> = filters
        .iter()
        .flat_map(|filter| filter.descriptor().inputs())
        .filter(|arg| arg.is_shifted())
        .map(|arg| arg.time_shift)
        .collect();
    shifts.sort_unstable();
    shifts.dedup();
    shifts
}

fn self_torn_down(context: &Context) -> DispatchError {
    DispatchError::Context(ContextError::ContextTornDown {
        context: context.name().to_owned(),
    })
}
