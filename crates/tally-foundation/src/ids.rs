//! Stable identifiers for facts and bindings
//!
//! Identifiers are small integers handed out by the collaborator that owns
//! the underlying object (working memory for facts, the binding arena for
//! bindings). They are compared by value, never by the payload they name.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident($repr:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            /// Create an identifier from its raw value.
            pub const fn new(raw: $repr) -> Self {
                Self(raw)
            }

            /// The raw identifier value.
            pub const fn get(self) -> $repr {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }

        impl From<$repr> for $name {
            fn from(raw: $repr) -> Self {
                Self(raw)
            }
        }
    };
}

define_id!(
    /// Stable identity of a fact inserted into working memory.
    ///
    /// Used as the key of an accumulator's reversal snapshots; two facts with
    /// equal payloads still have distinct identities.
    FactId(u64),
    "fact"
);

define_id!(
    /// Identity of a binding descriptor, assigned when the binding is declared.
    ///
    /// Structurally equal bindings declared twice get different ids, so
    /// substitution by id is never ambiguous.
    BindingId(u32),
    "binding"
);
