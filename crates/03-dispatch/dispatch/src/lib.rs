//! Type-indexed dataflow dispatch.
//!
//! Filters declare the decoration types they read and write. A
//! [`PacketFactory`] issues [`Packet`]s in sequence; attaching a decoration to
//! a packet runs every filter whose inputs are now satisfied, and feeds their
//! outputs back into the same packet. Inputs may also name a decoration from a
//! packet issued earlier by the same factory.

mod descriptor;
mod error;
mod factory;
mod filter;
mod packet;
mod registry;


pub use descriptor::{Arguments, FilterArgument, FilterDescriptor};
pub use error::{DispatchError, DispatchResult};
pub use factory::{ContextDispatchExt, FactoryConfig, PacketFactory};
pub use filter::{AutoFilter, Filter, FilterBuilder, FilterCall};
pub use packet::Packet;
pub use registry::FilterRegistry;
