//! Parley - streaming chat relay and conversation synchronization core.
//!
//! The crate has three layers:
//! - [`gateway`]: one streaming call to the generative-AI provider, exposed
//!   as an ordered fragment stream.
//! - [`api`]: the network-facing relay that turns that call into a
//!   `text/event-stream` response with a `[DONE]` terminator.
//! - [`sync`]: the client-side synchronizer that drives a user turn
//!   end-to-end against a [`store::MessageLog`] and [`store::BlobStore`],
//!   merging the in-flight stream into the durable message view.

pub mod api;
pub mod config;
pub mod gateway;
pub mod models;
pub mod store;
pub mod sync;
