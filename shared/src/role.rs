//! Participant roles.

use std::fmt;

use bitcode::{Decode, Encode};

/// Which side of a race pairing this process plays.
///
/// Fixed for the lifetime of a network service: a Display advertises and
/// accepts invitations, a Controller browses and sends them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum Role {
    /// Hosts the race and consumes control input.
    Display,
    /// Supplies steering/throttle input to a Display.
    Controller,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Controller => "controller",
        }
    }

    pub const fn is_display(self) -> bool {
        matches!(self, Self::Display)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
