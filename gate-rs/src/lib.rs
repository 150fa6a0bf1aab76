//! gate-rs: Admission and capacity control for a generation service
//!
//! Every resource-consuming "produce" request passes through three gates
//! before a new item is persisted:
//!
//! - **Rate limiting**: fixed-window request counters per identity/route
//! - **Daily quota**: per-owner, per-category counters keyed by UTC day
//! - **Capacity**: a bounded per-owner item store that evicts oldest-first
//!
//! The three are composed by [`pipeline::AdmissionPipeline`], which holds
//! an owner-scoped lock across the quota and capacity stages and undoes
//! the quota reservation if a later stage fails.
//!
//! # Failure policy
//!
//! Rate-limit store failures fail open (the request is allowed and a
//! warning logged); quota and capacity failures fail closed. There is no
//! transaction spanning the metadata and blob stores, so eviction is a
//! best-effort two-phase delete with an orphan list for reconciliation.
//!
//! # Modules
//!
//! - [`clock`]: time source abstraction for deterministic tests
//! - [`ratelimit`]: fixed-window request limiter
//! - [`quota`]: per-day usage counters
//! - [`capacity`]: bounded item store with oldest-first eviction
//! - [`pipeline`]: the composed produce operation
//! - [`store`]: metadata and blob store contracts and backends
//! - [`api`]: HTTP surface mapping results to status codes
//! - [`config`]: configuration management
//! - [`error`]: error types and handling

pub mod api;
pub mod capacity;
pub mod clock;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod quota;
pub mod ratelimit;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{GateError, Result};
