//! Core data model: datafile records, the wire format, payload validation.

pub mod record;
pub mod validation;
pub mod wire;

pub use record::{DatafileRecord, revision_of};
pub use validation::SdkKeysPayload;
pub use wire::{WirePush, WireRequest};
