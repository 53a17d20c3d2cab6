use context::Context;
use dispatch::{FilterArgument, FilterDescriptor, PacketFactory};
use runnable::Runnable;
use serde::Serialize;

/// Serialisable view of one context and its subtree.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContextSnapshot {
    pub name: String,
    pub serial: u64,
    pub state: &'static str,
    /// Member types in injection order.
    pub members: Vec<String>,
    pub runnables: Vec<RunnableSnapshot>,
    /// Filters of this context's own factory; empty when it has none.
    pub filters: Vec<FilterSnapshot>,
    pub children: Vec<ContextSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunnableSnapshot {
    pub type_name: String,
    pub name: String,
    pub state: &'static str,
    pub thread: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilterSnapshot {
    pub name: String,
    pub source: bool,
    pub arguments: Vec<ArgumentSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ArgumentSnapshot {
    pub decoration: String,
    pub input: bool,
    pub output: bool,
    pub rvalue: bool,
    pub time_shift: u32,
}

pub fn snapshot(context: &Context) -> ContextSnapshot {
    let filters = context
        .resolve_local::<PacketFactory>()
        .map(|factory| {
            factory
                .registry()
                .descriptors()
                .iter()
                .map(FilterSnapshot::from)
                .collect()
        })
        .unwrap_or_default();

    ContextSnapshot {
        name: context.sigil().display_name(),
        serial: context.serial(),
        state: context.state().label(),
        members: context
            .members()
            .into_iter()
            .map(|member| member.display_name())
            .collect(),
        runnables: context
            .runnables()
            .iter()
            .map(|entry| {
                let runnable = entry.runnable();
                RunnableSnapshot {
                    type_name: entry.identity().display_name(),
                    name: runnable.name().to_owned(),
                    state: runnable.state().label(),
                    thread: runnable.thread_id().map(|tid| format!("{tid:?}")),
                }
            })
            .collect(),
        filters,
        children: context.children().iter().map(snapshot).collect(),
    }
}

pub fn to_json(snapshot: &ContextSnapshot) -> serde_json::Result<String> {
    serde_json::to_string_pretty(snapshot)
}

impl From<&FilterDescriptor> for FilterSnapshot {
    fn from(descriptor: &FilterDescriptor) -> Self {
        Self {
            name: descriptor.name(),
            source: descriptor.is_source(),
            arguments: descriptor
                .arguments()
                .iter()
                .map(ArgumentSnapshot::from)
                .collect(),
        }
    }
}

impl From<&FilterArgument> for ArgumentSnapshot {
    fn from(arg: &FilterArgument) -> Self {
        Self {
            decoration: arg.id.display_name(),
            input: arg.is_input,
            output: arg.is_output,
            rvalue: arg.is_rvalue,
            time_shift: arg.time_shift,
        }
    }
}
