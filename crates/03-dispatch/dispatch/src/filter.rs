use std::any::Any;
use std::fmt;
use std::sync::Arc;

use identity::TypeIdentity;
use smallvec::SmallVec;

use crate::descriptor::{FilterArgument, FilterDescriptor};
use crate::error::{DispatchError, DispatchResult};

/// Type-erased decoration value shared between packets and filter calls.
pub(crate) type Decoration = Arc<dyn Any + Send + Sync>;

type FilterBody = dyn Fn(&mut FilterCall<'_>) -> anyhow::Result<()> + Send + Sync;

/// A descriptor paired with the body invoked once its inputs are satisfied.
#[derive(Clone)]
pub struct Filter {
    descriptor: Arc<FilterDescriptor>,
    body: Arc<FilterBody>,
}

impl Filter {
    /// Starts a filter whose diagnostic identity is `T`.
    pub fn builder<T: ?Sized + 'static>() -> FilterBuilder {
        FilterBuilder::new(Some(TypeIdentity::of::<T>()))
    }

    pub fn builder_for(target: TypeIdentity) -> FilterBuilder {
        FilterBuilder::new(Some(target))
    }

    /// Starts a filter identified by the closure type passed to [`FilterBuilder::build`].
    pub fn closure() -> FilterBuilder {
        FilterBuilder::new(None)
    }

    /// Wraps a component whose `filter` method is the body.
    pub fn from_component<C: AutoFilter>(component: Arc<C>) -> DispatchResult<Self> {
        C::declare(Filter::builder::<C>()).build(move |call| component.filter(call))
    }

    pub fn descriptor(&self) -> &FilterDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> String {
        self.descriptor.name()
    }

    pub(crate) fn invoke(&self, call: &mut FilterCall<'_>) -> anyhow::Result<()> {
        (self.body)(call)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Filter").field(&*self.descriptor).finish()
    }
}

/// Component that declares its own filter arguments.
pub trait AutoFilter: Send + Sync + 'static {
    /// Adds this component's arguments to `builder`.
    fn declare(builder: FilterBuilder) -> FilterBuilder;

    fn filter(&self, call: &mut FilterCall<'_>) -> anyhow::Result<()>;
}

/// Collects filter arguments in declaration order.
pub struct FilterBuilder {
    target: Option<TypeIdentity>,
    arguments: Vec<FilterArgument>,
}

impl FilterBuilder {
    fn new(target: Option<TypeIdentity>) -> Self {
        Self {
            target,
            arguments: Vec::new(),
        }
    }

    pub fn input<T: Send + Sync + 'static>(self) -> Self {
        self.argument(FilterArgument::input(TypeIdentity::of::<T>()))
    }

    /// Reads `T` from the packet `shift` positions earlier.
    pub fn prev<T: Send + Sync + 'static>(self, shift: u32) -> Self {
        self.argument(FilterArgument::shifted(TypeIdentity::of::<T>(), shift))
    }

    pub fn output<T: Send + Sync + 'static>(self) -> Self {
        self.argument(FilterArgument::output(TypeIdentity::of::<T>()))
    }

    /// Reads `T` and may replace it before any other consumer sees it.
    pub fn in_out<T: Send + Sync + 'static>(self) -> Self {
        self.argument(FilterArgument::in_out(TypeIdentity::of::<T>()))
    }

    pub fn argument(mut self, argument: FilterArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn build<F>(self, body: F) -> DispatchResult<Filter>
    where
        F: Fn(&mut FilterCall<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let target = self.target.unwrap_or_else(TypeIdentity::of::<F>);
        let descriptor = FilterDescriptor::new(target, self.arguments)?;
        Ok(Filter {
            descriptor: Arc::new(descriptor),
            body: Arc::new(body),
        })
    }
}

/// View handed to a filter body: its declared inputs and a sink for outputs.
pub struct FilterCall<'a> {
    descriptor: &'a FilterDescriptor,
    sequence: u64,
    inputs: SmallVec<[(FilterArgument, Decoration); 4]>,
    outputs: SmallVec<[(TypeIdentity, Decoration); 2]>,
}

impl<'a> FilterCall<'a> {
    pub(crate) fn new(
        descriptor: &'a FilterDescriptor,
        sequence: u64,
        inputs: SmallVec<[(FilterArgument, Decoration); 4]>,
    ) -> Self {
        Self {
            descriptor,
            sequence,
            inputs,
            outputs: SmallVec::new(),
        }
    }

    /// Sequence number of the packet being dispatched.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn descriptor(&self) -> &FilterDescriptor {
        self.descriptor
    }

    /// Current-packet value of a declared input or in/out argument.
    pub fn get<T: Send + Sync + 'static>(&self) -> DispatchResult<&T> {
        self.lookup::<T>(0)
    }

    /// Value of `T` from the packet `shift` positions earlier.
    pub fn prev<T: Send + Sync + 'static>(&self, shift: u32) -> DispatchResult<&T> {
        self.lookup::<T>(shift)
    }

    fn lookup<T: Send + Sync + 'static>(&self, shift: u32) -> DispatchResult<&T> {
        let id = TypeIdentity::of::<T>();
        match self.descriptor.argument_at(id, shift) {
            Some(arg) if arg.is_input => {}
            _ => return Err(self.undeclared(id, true)),
        }
        self.inputs
            .iter()
            .find(|(arg, _)| arg.id == id && arg.time_shift == shift)
            .and_then(|(_, value)| value.downcast_ref::<T>())
            .ok_or_else(|| DispatchError::MissingDecoration {
                filter: self.descriptor.name(),
                decoration: id.display_name(),
            })
    }

    /// Supplies a declared output. A second call for the same type replaces the first.
    pub fn put<T: Send + Sync + 'static>(&mut self, value: T) -> DispatchResult<()> {
        let id = TypeIdentity::of::<T>();
        match self.descriptor.argument(id) {
            Some(arg) if arg.is_output => {}
            _ => return Err(self.undeclared(id, false)),
        }
        let value: Decoration = Arc::new(value);
        match self.outputs.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = value,
            None => self.outputs.push((id, value)),
        }
        Ok(())
    }

    fn undeclared(&self, id: TypeIdentity, input: bool) -> DispatchError {
        let filter = self.descriptor.name();
        let decoration = id.display_name();
        if input {
            DispatchError::UndeclaredInput { filter, decoration }
        } else {
            DispatchError::UndeclaredOutput { filter, decoration }
        }
    }

    pub(crate) fn into_outputs(self) -> SmallVec<[(TypeIdentity, Decoration); 2]> {
        self.outputs
    }
}
