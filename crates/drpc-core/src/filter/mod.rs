//! Client and server filter chains.
//!
//! Both chains are plain ordered lists driven by a loop in the chain
//! itself. Filters never call each other. A client filter edits the
//! per-call candidate list; a server filter inspects an inbound request and
//! either lets it continue or answers it directly.

pub mod client;
pub mod server;

pub use client::{
    AddressBlocklistFilter, ClientCall, ClientFilter, ClientFilterChain, ClientLogFilter,
};
pub use server::{
    FilterDecision, ServerCall, ServerFilter, ServerFilterChain, ServerLogFilter,
    ServiceAllowListFilter,
};
