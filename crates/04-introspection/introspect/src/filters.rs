use std::collections::HashSet;

use context::Context;
use dispatch::{ContextDispatchExt, FilterDescriptor, Packet};
use identity::TypeIdentity;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InspectError {
    #[error("no packet factory is visible from this context")]
    NoFactory,

    #[error("filter `{name}` not found")]
    FilterNotFound { name: String },
}

/// Display name of the context's sigil.
pub fn context_name(context: &Context) -> String {
    context.sigil().display_name()
}

/// Most recently issued live packet of the nearest factory.
pub fn current_packet(context: &Context) -> Option<Packet> {
    context.find_packet_factory()?.current_packet()
}

pub fn descriptor_by_name(context: &Context, name: &str) -> Option<FilterDescriptor> {
    context.find_packet_factory()?.registry().lookup_by_name(name)
}

/// Decorations some filter reads but no filter produces, by display name.
pub fn list_root_decorations(context: &Context) -> Vec<String> {
    let Some(factory) = context.find_packet_factory() else {
        return Vec::new();
    };
    factory
        .registry()
        .unsatisfied_inputs()
        .into_iter()
        .map(TypeIdentity::display_name)
        .collect()
}

/// Renders who supplies each input of the named filter, recursively.
///
/// The first line is the filter itself. Each following line names an input
/// and a filter producing it, indented one space per level. A producer already
/// on the current chain is listed but not expanded again.
pub fn filter_info(context: &Context, name: &str) -> Result<String, InspectError> {
    let factory = context.find_packet_factory().ok_or(InspectError::NoFactory)?;
    let descriptors = factory.registry().descriptors();
    let root = descriptors
        .iter()
        .find(|descriptor| {
            let target = descriptor.target_type();
            target.short_name() == name || target.name() == name || target.display_name() == name
        })
        .ok_or_else(|| InspectError::FilterNotFound {
            name: name.to_owned(),
        })?;

    let mut out = format!("{}\n", root.name());
    let mut chain = HashSet::from([root.target_type()]);
    describe_providers(&mut out, &descriptors, root, 1, &mut chain);
    Ok(out)
}

fn describe_providers(
    out: &mut String,
    descriptors: &[FilterDescriptor],
    consumer: &FilterDescriptor,
    depth: usize,
    chain: &mut HashSet<TypeIdentity>,
) {
    for arg in consumer.inputs() {
        for provider in descriptors.iter().filter(|d| d.provides(arg.id)) {
            out.push_str(&format!(
                "{}{} {}\n",
                " ".repeat(depth),
                arg.id.display_name(),
                provider.name()
            ));
            if chain.insert(provider.target_type()) {
                describe_providers(out, descriptors, provider, depth + 1, chain);
                chain.remove(&provider.target_type());
            }
        }
    }
}
