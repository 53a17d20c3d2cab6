use std::fmt;

use identity::TypeIdentity;
use smallvec::SmallVec;

use crate::error::{DispatchError, DispatchResult};

/// One typed edge between a filter and a decoration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FilterArgument {
    pub id: TypeIdentity,
    pub is_input: bool,
    pub is_output: bool,
    /// Consumed and replaced in place.
    pub is_rvalue: bool,
    /// Packets back in the factory's sequence; zero means the current packet.
    pub time_shift: u32,
}

impl FilterArgument {
    pub fn input(id: TypeIdentity) -> Self {
        Self {
            id,
            is_input: true,
            is_output: false,
            is_rvalue: false,
            time_shift: 0,
        }
    }

    pub fn output(id: TypeIdentity) -> Self {
        Self {
            id,
            is_input: false,
            is_output: true,
            is_rvalue: false,
            time_shift: 0,
        }
    }

    pub fn in_out(id: TypeIdentity) -> Self {
        Self {
            id,
            is_input: true,
            is_output: true,
            is_rvalue: true,
            time_shift: 0,
        }
    }

    /// Input read from the packet `shift` positions earlier.
    pub fn shifted(id: TypeIdentity, shift: u32) -> Self {
        Self {
            time_shift: shift,
            ..Self::input(id)
        }
    }

    pub fn is_shifted(&self) -> bool {
        self.time_shift > 0
    }

    /// Input on the current packet that is not also produced by the same filter.
    pub fn is_plain_input(&self) -> bool {
        self.is_input && !self.is_rvalue && self.time_shift == 0
    }

    /// Output that introduces a new decoration rather than replacing one.
    pub fn is_plain_output(&self) -> bool {
        self.is_output && !self.is_rvalue
    }
}

impl fmt::Display for FilterArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match (self.is_input, self.is_output) {
            (true, true) => "inout",
            (true, false) => "in",
            (false, true) => "out",
            (false, false) => "none",
        };
        write!(f, "{direction} {}", self.id.display_name())?;
        if self.time_shift > 0 {
            write!(f, " (prev={})", self.time_shift)?;
        }
        Ok(())
    }
}

pub type Arguments = SmallVec<[FilterArgument; 4]>;

/// Static shape of a registered filter: its type and ordered arguments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FilterDescriptor {
    target_type: TypeIdentity,
    arguments: Arguments,
}

impl FilterDescriptor {
    /// Validates and builds a descriptor.
    ///
    /// Rejects arguments that are neither input nor output, time shifts on
    /// anything but a pure input, in/out flags that disagree with `is_rvalue`,
    /// and the same `(id, time_shift)` pair appearing twice.
    pub fn new(
        target_type: TypeIdentity,
        arguments: impl IntoIterator<Item = FilterArgument>,
    ) -> DispatchResult<Self> {
        let arguments: Arguments = arguments.into_iter().collect();
        let invalid = |reason| DispatchError::InvalidDescriptor {
            filter: target_type.display_name(),
            reason,
        };

        for (index, arg) in arguments.iter().enumerate() {
            if !arg.is_input && !arg.is_output {
                return Err(invalid("argument is neither input nor output"));
            }
            if arg.is_rvalue != (arg.is_input && arg.is_output) {
                return Err(invalid("in/out arguments must be marked rvalue"));
            }
            if arg.time_shift > 0 && arg.is_output {
                return Err(invalid("time-shifted arguments must be pure inputs"));
            }
            let repeated = arguments[..index]
                .iter()
                .any(|prior| prior.id == arg.id && prior.time_shift == arg.time_shift);
            if repeated {
                return Err(invalid("argument repeated"));
            }
        }

        Ok(Self {
            target_type,
            arguments,
        })
    }

    pub fn target_type(&self) -> TypeIdentity {
        self.target_type
    }

    /// Display name of the filter type.
    pub fn name(&self) -> String {
        self.target_type.display_name()
    }

    pub fn arguments(&self) -> &[FilterArgument] {
        &self.arguments
    }

    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    /// The argument naming `id` on the current packet, if declared.
    pub fn argument(&self, id: TypeIdentity) -> Option<&FilterArgument> {
        self.argument_at(id, 0)
    }

    pub fn argument_at(&self, id: TypeIdentity, time_shift: u32) -> Option<&FilterArgument> {
        self.arguments
            .iter()
            .find(|arg| arg.id == id && arg.time_shift == time_shift)
    }

    /// True if this filter introduces `id` as a new decoration.
    pub fn provides(&self, id: TypeIdentity) -> bool {
        self.arguments
            .iter()
            .any(|arg| arg.id == id && arg.is_plain_output())
    }

    /// True if this filter reads `id` at any time shift.
    pub fn consumes(&self, id: TypeIdentity) -> bool {
        self.arguments.iter().any(|arg| arg.id == id && arg.is_input)
    }

    /// True if this filter replaces `id` in place.
    pub fn transforms(&self, id: TypeIdentity) -> bool {
        self.arguments.iter().any(|arg| arg.id == id && arg.is_rvalue)
    }

    /// A filter with no inputs at all.
    pub fn is_source(&self) -> bool {
        !self.arguments.iter().any(|arg| arg.is_input)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &FilterArgument> {
        self.arguments.iter().filter(|arg| arg.is_input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &FilterArgument> {
        self.arguments.iter().filter(|arg| arg.is_output)
    }
}

impl fmt::Display for FilterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        for (index, arg) in self.arguments.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}
