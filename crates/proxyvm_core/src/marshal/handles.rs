//! Opaque host-issued identifiers.

use std::fmt::{Display, Formatter};

macro_rules! host_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            pub fn new(raw: u32) -> Self {
                Self(raw)
            }

            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

host_id!(
    /// Metric defined once per VM and cached by the extension.
    MetricHandle
);
host_id!(
    /// Shared queue registered or resolved by name.
    QueueHandle
);
host_id!(
    /// Correlates one outstanding outbound call with its response callback.
    CalloutTicket
);
host_id!(
    /// Compare-and-swap version of one shared-data entry.
    CasToken
);
