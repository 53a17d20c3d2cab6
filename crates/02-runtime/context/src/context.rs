use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use identity::TypeIdentity;
use parking_lot::{Mutex, RwLock};
use runnable::Runnable;
use tracing::debug;

use crate::error::{ContextError, ContextResult};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Sigil naming the conventional root context.
pub struct Global;

/// Coarse lifecycle of a context.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextState {
    /// Accepting children, members and runnables; runnables not started.
    Setup = 0,
    /// Runnables started; late runnables start on registration.
    Initiated = 1,
    /// Teardown in progress; structural mutation is refused.
    TearingDown = 2,
    /// Teardown complete.
    TornDown = 3,
}

impl ContextState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ContextState::Setup,
            1 => ContextState::Initiated,
            2 => ContextState::TearingDown,
            _ => ContextState::TornDown,
        }
    }

    /// True once teardown has begun.
    pub fn is_torn_down(self) -> bool {
        self >= ContextState::TearingDown
    }

    pub fn label(self) -> &'static str {
        match self {
            ContextState::Setup => "setup",
            ContextState::Initiated => "initiated",
            ContextState::TearingDown => "tearing-down",
            ContextState::TornDown => "torn-down",
        }
    }
}

struct Member {
    identity: TypeIdentity,
    value: Arc<dyn Any + Send + Sync>,
}

struct RegisteredRunnable {
    identity: TypeIdentity,
    runnable: Weak<dyn Runnable>,
}

/// A live runnable registered directly in a context.
#[derive(Clone)]
pub struct RunnableEntry {
    identity: TypeIdentity,
    runnable: Arc<dyn Runnable>,
}

impl RunnableEntry {
    /// Concrete type of the runnable.
    pub fn identity(&self) -> TypeIdentity {
        self.identity
    }

    pub fn runnable(&self) -> &Arc<dyn Runnable> {
        &self.runnable
    }
}

struct ContextInner {
    serial: u64,
    sigil: TypeIdentity,
    parent: Option<Weak<ContextInner>>,
    // Published copy-on-write so readers never see a partially linked list.
    children: ArcSwap<Vec<Context>>,
    // Serializes child-list mutation and state transitions.
    structure: Mutex<()>,
    state: AtomicU8,
    members: RwLock<Vec<Member>>,
    runnables: RwLock<Vec<RegisteredRunnable>>,
}

/// Shared handle to a node of the context tree.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Creates a root context whose kind is named by `S`.
    pub fn root<S: 'static>() -> Self {
        Self::root_with_sigil(TypeIdentity::of::<S>())
    }

    /// Creates a root context named by the [`Global`] sigil.
    pub fn global() -> Self {
        Self::root::<Global>()
    }

    pub fn root_with_sigil(sigil: TypeIdentity) -> Self {
        Self::with_parent(sigil, None)
    }

    fn with_parent(sigil: TypeIdentity, parent: Option<Weak<ContextInner>>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
                sigil,
                parent,
                children: ArcSwap::from_pointee(Vec::new()),
                structure: Mutex::new(()),
                state: AtomicU8::new(ContextState::Setup as u8),
                members: RwLock::new(Vec::new()),
                runnables: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Appends a new child named by `S`. See [`Context::create_child_with_sigil`].
    pub fn create_child<S: 'static>(&self) -> ContextResult<Context> {
        self.create_child_with_sigil(TypeIdentity::of::<S>())
    }

    /// Appends a new child as the last sibling.
    ///
    /// The sigil only names the child for diagnostics. Fails with
    /// [`ContextError::ContextTornDown`] once teardown of `self` has begun.
    pub fn create_child_with_sigil(&self, sigil: TypeIdentity) -> ContextResult<Context> {
        let _structure = self.inner.structure.lock();
        if self.state().is_torn_down() {
            return Err(self.torn_down());
        }

        let child = Context::with_parent(sigil, Some(Arc::downgrade(&self.inner)));
        let current = self.inner.children.load();
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(child.clone());
        self.inner.children.store(Arc::new(next));

        debug!(parent = %self.name(), child = %child.name(), serial = child.serial(), "context created");
        Ok(child)
    }

    pub fn first_child(&self) -> Option<Context> {
        self.inner.children.load().first().cloned()
    }

    /// Next child of the same parent in creation order.
    pub fn next_sibling(&self) -> Option<Context> {
        let parent = self.parent()?;
        let siblings = parent.inner.children.load();
        let position = siblings.iter().position(|sibling| sibling.ptr_eq(self))?;
        siblings.get(position + 1).cloned()
    }

    /// Consistent snapshot of the children in creation order.
    pub fn children(&self) -> Arc<Vec<Context>> {
        self.inner.children.load_full()
    }

    pub fn child_count(&self) -> usize {
        self.inner.children.load().len()
    }

    pub fn parent(&self) -> Option<Context> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Context { inner })
    }

    pub fn sigil(&self) -> TypeIdentity {
        self.inner.sigil
    }

    /// Short name of the sigil type.
    pub fn name(&self) -> &'static str {
        self.inner.sigil.short_name()
    }

    /// Process-unique serial number, assigned at creation.
    pub fn serial(&self) -> u64 {
        self.inner.serial
    }

    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ContextState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    pub fn is_initiated(&self) -> bool {
        self.state() == ContextState::Initiated
    }

    pub fn is_torn_down(&self) -> bool {
        self.state().is_torn_down()
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn torn_down(&self) -> ContextError {
        ContextError::ContextTornDown {
            context: self.name().to_owned(),
        }
    }

    /// Takes ownership of `value` as a member of this context.
    pub fn inject<T: Send + Sync + 'static>(&self, value: T) -> ContextResult<Arc<T>> {
        self.inject_arc(Arc::new(value))
    }

    /// Shares ownership of `value` with this context. One member per type.
    pub fn inject_arc<T: Send + Sync + 'static>(&self, value: Arc<T>) -> ContextResult<Arc<T>> {
        let identity = TypeIdentity::of::<T>();
        let _structure = self.inner.structure.lock();
        if self.state().is_torn_down() {
            return Err(self.torn_down());
        }

        let mut members = self.inner.members.write();
        if members.iter().any(|member| member.identity == identity) {
            return Err(ContextError::DuplicateMember {
                context: self.name().to_owned(),
                member: identity.short_name().to_owned(),
            });
        }
        members.push(Member {
            identity,
            value: Arc::clone(&value) as Arc<dyn Any + Send + Sync>,
        });
        Ok(value)
    }

    /// Finds a member of type `T` in this context only.
    pub fn resolve_local<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let identity = TypeIdentity::of::<T>();
        let value = self
            .inner
            .members
            .read()
            .iter()
            .find(|member| member.identity == identity)
            .map(|member| Arc::clone(&member.value))?;
        value.downcast::<T>().ok()
    }

    /// Finds a member of type `T` in this context or the nearest ancestor holding one.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let mut current = Some(self.clone());
        while let Some(context) = current {
            if let Some(found) = context.resolve_local::<T>() {
                return Some(found);
            }
            current = context.parent();
        }
        None
    }

    /// Types of the members owned by this context, in injection order.
    pub fn members(&self) -> Vec<TypeIdentity> {
        self.inner
            .members
            .read()
            .iter()
            .map(|member| member.identity)
            .collect()
    }

    /// Injects `runnable` as a member and registers it for lifecycle management.
    pub fn add_runnable<R: Runnable>(&self, runnable: R) -> ContextResult<Arc<R>> {
        self.add_runnable_arc(Arc::new(runnable))
    }

    pub fn add_runnable_arc<R: Runnable>(&self, runnable: Arc<R>) -> ContextResult<Arc<R>> {
        let runnable = self.inject_arc(runnable)?;
        self.register_runnable(&runnable)?;
        Ok(runnable)
    }

    /// Registers a runnable owned elsewhere. The context keeps only a weak reference.
    ///
    /// Runnables registered with an initiated context start immediately.
    pub fn register_runnable<R: Runnable>(&self, runnable: &Arc<R>) -> ContextResult<()> {
        let erased: Arc<dyn Runnable> = Arc::clone(runnable) as Arc<dyn Runnable>;
        let initiated = {
            let _structure = self.inner.structure.lock();
            if self.state().is_torn_down() {
                return Err(self.torn_down());
            }
            self.inner.runnables.write().push(RegisteredRunnable {
                identity: TypeIdentity::of::<R>(),
                runnable: Arc::downgrade(&erased),
            });
            self.is_initiated()
        };

        if initiated {
            erased.start()?;
        }
        Ok(())
    }

    /// Live runnables registered directly in this context, in registration order.
    pub fn runnables(&self) -> Vec<RunnableEntry> {
        self.inner
            .runnables
            .read()
            .iter()
            .filter_map(|registered| {
                registered.runnable.upgrade().map(|runnable| RunnableEntry {
                    identity: registered.identity,
                    runnable,
                })
            })
            .collect()
    }

    /// Starts this context's runnables, then initiates every existing child.
    pub fn initiate(&self) -> ContextResult<()> {
        {
            let _structure = self.inner.structure.lock();
            match self.state() {
                ContextState::Setup => self.set_state(ContextState::Initiated),
                ContextState::Initiated => {}
                ContextState::TearingDown | ContextState::TornDown => {
                    return Err(self.torn_down())
                }
            }
        }
        debug!(context = %self.name(), serial = self.serial(), "context initiated");

        for entry in self.runnables() {
            entry.runnable.start()?;
        }
        for child in self.children().iter() {
            match child.initiate() {
                Ok(()) | Err(ContextError::ContextTornDown { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Tears this subtree down, children first.
    ///
    /// Stops every runnable registered here and blocks until each has ended,
    /// releases members, then detaches from the parent. Idempotent.
    pub fn teardown(&self) {
        {
            let _structure = self.inner.structure.lock();
            if self.state().is_torn_down() {
                return;
            }
            self.set_state(ContextState::TearingDown);
        }
        debug!(context = %self.name(), serial = self.serial(), "context teardown started");

        for child in self.children().iter() {
            child.teardown();
        }

        let runnables = self.runnables();
        for entry in &runnables {
            entry.runnable.stop();
        }
        for entry in &runnables {
            entry.runnable.wait();
        }
        drop(runnables);

        self.inner.runnables.write().clear();
        let members = std::mem::take(&mut *self.inner.members.write());
        drop(members);

        self.set_state(ContextState::TornDown);
        if let Some(parent) = self.parent() {
            parent.detach_child(self);
        }
        debug!(context = %self.name(), serial = self.serial(), "context torn down");
    }

    fn detach_child(&self, child: &Context) {
        let _structure = self.inner.structure.lock();
        let current = self.inner.children.load();
        if current.iter().any(|candidate| candidate.ptr_eq(child)) {
            let next: Vec<Context> = current
                .iter()
                .filter(|candidate| !candidate.ptr_eq(child))
                .cloned()
                .collect();
            self.inner.children.store(Arc::new(next));
        }
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("serial", &self.serial())
            .field("sigil", &self.name())
            .field("state", &self.state())
            .field("children", &self.child_count())
            .finish()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        // Children go first so their runnables stop before ours.
        drop(self.children.swap(Arc::new(Vec::new())));

        let runnables: Vec<Arc<dyn Runnable>> = self
            .runnables
            .get_mut()
            .drain(..)
            .filter_map(|registered| registered.runnable.upgrade())
            .collect();
        for runnable in &runnables {
            runnable.stop();
        }
        for runnable in &runnables {
            runnable.wait();
        }
    }
}
