use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use identity::TypeIdentity;
use parking_lot::Mutex;
use tracing::debug;

use crate::descriptor::FilterDescriptor;
use crate::error::{DispatchError, DispatchResult};
use crate::filter::Filter;

/// Filters registered in one scope, in registration order.
///
/// Readers take immutable snapshots; registration swaps in a new list under a
/// writer lock. Once frozen, registration fails with
/// [`DispatchError::RegistryFrozen`].
pub struct FilterRegistry {
    filters: ArcSwap<Vec<Filter>>,
    write: Mutex<()>,
    frozen: AtomicBool,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            filters: ArcSwap::from_pointee(Vec::new()),
            write: Mutex::new(()),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn register(&self, filter: Filter) -> DispatchResult<()> {
        let _write = self.write.lock();
        if self.is_frozen() {
            return Err(DispatchError::RegistryFrozen {
                filter: filter.name(),
            });
        }

        let current = self.filters.load();
        if current
            .iter()
            .any(|existing| existing.descriptor() == filter.descriptor())
        {
            return Err(DispatchError::DuplicateFilter {
                filter: filter.name(),
            });
        }

        debug!(filter = %filter.descriptor(), index = current.len(), "filter registered");
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(filter);
        self.filters.store(Arc::new(next));
        Ok(())
    }

    pub fn freeze(&self) {
        let _write = self.write.lock();
        if !self.frozen.swap(true, Ordering::AcqRel) {
            debug!(filters = self.len(), "filter registry frozen");
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Current filters in registration order.
    pub fn snapshot(&self) -> Arc<Vec<Filter>> {
        self.filters.load_full()
    }

    pub fn descriptors(&self) -> Vec<FilterDescriptor> {
        self.filters
            .load()
            .iter()
            .map(|filter| filter.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.filters.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact match on the filter's type.
    pub fn lookup(&self, target: TypeIdentity) -> Option<FilterDescriptor> {
        self.find(|descriptor| descriptor.target_type() == target)
    }

    /// Match on the short, display or fully qualified name.
    pub fn lookup_by_name(&self, name: &str) -> Option<FilterDescriptor> {
        self.find(|descriptor| {
            let target = descriptor.target_type();
            target.short_name() == name || target.name() == name || target.display_name() == name
        })
    }

    fn find(&self, matches: impl Fn(&FilterDescriptor) -> bool) -> Option<FilterDescriptor> {
        self.filters
            .load()
            .iter()
            .map(Filter::descriptor)
            .find(|descriptor| matches(descriptor))
            .cloned()
    }

    /// Filters that introduce `id` as a new decoration. In/out filters are excluded.
    pub fn argument_providing(&self, id: TypeIdentity) -> Vec<FilterDescriptor> {
        self.filters
            .load()
            .iter()
            .map(Filter::descriptor)
            .filter(|descriptor| descriptor.provides(id))
            .cloned()
            .collect()
    }

    /// Inputs that no registered filter introduces; they must come from outside.
    pub fn unsatisfied_inputs(&self) -> BTreeSet<TypeIdentity> {
        let filters = self.filters.load();
        let provided: BTreeSet<TypeIdentity> = filters
            .iter()
            .flat_map(|filter| filter.descriptor().arguments())
            .filter(|arg| arg.is_plain_output())
            .map(|arg| arg.id)
            .collect();

        filters
            .iter()
            .flat_map(|filter| filter.descriptor().arguments())
            .filter(|arg| arg.is_input && !arg.is_rvalue && !provided.contains(&arg.id))
            .map(|arg| arg.id)
            .collect()
    }

    /// Largest time shift declared by any filter, or zero.
    pub fn max_time_shift(&self) -> u32 {
        self.filters
            .load()
            .iter()
            .flat_map(|filter| filter.descriptor().arguments())
            .map(|arg| arg.time_shift)
            .max()
            .unwrap_or(0)
    }
}
