//! azvnet reconciler library.
//!
//! The crate ships the `azvnet-reconciler` binary, which answers network
//! events read from stdin. The library surface holds the request pipeline so
//! that it can be driven directly from integration tests.

pub mod config;
pub mod convergence;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod provider;
pub mod resources;
