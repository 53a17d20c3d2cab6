//! Read-only diagnostics over the context tree and its filter graph.
//!
//! Nothing here mutates the runtime. Text views write to any [`std::io::Write`]
//! sink; [`snapshot`] builds a serialisable view model for JSON export.

mod filters;
mod graph;
mod snapshot;
mod tree;


pub use filters::{
    context_name, current_packet, descriptor_by_name, filter_info, list_root_decorations,
    InspectError,
};
pub use graph::{dependency_graph_string, write_dependency_graph};
pub use snapshot::{snapshot, to_json, ArgumentSnapshot, ContextSnapshot, FilterSnapshot, RunnableSnapshot};
pub use tree::{print_runnables, print_tree};
