//! Core data models for lookups: queries, records and diagnostics.

mod diagnostics;
mod query;
mod record;

pub(crate) use diagnostics::duration_ms;
pub use diagnostics::{Diagnostic, Diagnostics, LookupResult, Outcome};
pub use query::{Query, QueryKind, QueryKinds};
pub use record::{fields, CanonicalRecord, FieldValue, PartialRecord, PartialRecordBuilder};
