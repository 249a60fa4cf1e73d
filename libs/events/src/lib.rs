//! # azvnet-events
//!
//! Event payloads and subject routing for the azvnet reconciler.
//!
//! ## Design Principles
//!
//! - One event per inbound message; it is mutated in place and discarded
//!   once the response has been encoded
//! - The subject is decoded once at the boundary into typed routing data
//! - Credentials travel encrypted whenever a crypto key is configured
//!
//! ## Subjects
//!
//! Subjects have the form `<kind>.<action>[.<suffix>]`:
//! - `virtual_network.create`, `azure_virtual_network.get.azure`
//! - `classic_virtual_network.update`
//!
//! Responses reuse the inbound subject with `.done` or `.error` appended.

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
