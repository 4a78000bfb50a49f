//! Identifier newtypes.
//!
//! Records owned by the pipeline (prescriptions, dispense events, holds,
//! override records) are keyed by UUIDs minted here. References into
//! external directories (patients, drugs, batches, actors) stay opaque
//! strings: the pipeline never interprets them.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            /// Mint a new, unique id.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

uuid_id!(
    /// Authoritative id of a prescription record.
    PrescriptionId
);
uuid_id!(
    /// Id of the immutable dispense event created at release.
    DispenseEventId
);
uuid_id!(
    /// Id of a hold entry in the hold registry.
    HoldId
);
uuid_id!(
    /// Id of an append-only override record.
    OverrideId
);

string_id!(
    /// Line item id, unique within its prescription (e.g. "line-1").
    LineId
);
string_id!(
    /// Patient directory reference.
    PatientId
);
string_id!(
    /// Clinician directory reference.
    ClinicianId
);
string_id!(
    /// Drug catalogue reference.
    DrugId
);
string_id!(
    /// Inventory batch reference.
    BatchId
);
string_id!(
    /// Authenticated staff member, as known to the identity service.
    ActorId
);
string_id!(
    /// Sale draft reference returned by the point-of-sale service.
    SaleDraftId
);
string_id!(
    /// Label artifact reference returned by the label printer.
    LabelId
);
