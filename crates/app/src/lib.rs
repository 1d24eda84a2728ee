//! # hearth-app
//!
//! Orchestration core — the live entity model and everything that reacts to
//! it.
//!
//! ## Responsibilities
//! - Entity model: [`provider::Service`], [`provider::Provider`] and the
//!   [`provider::ServiceBackend`] seam integrations implement
//! - [`registry::Registry`] — authoritative map of providers and services
//! - [`devices::Devices`] — inferred devices, merged by shared identifiers
//! - [`constraints::Constraints`] and [`handlers::Handlers`] — arbitration
//!   and interception of writes
//! - [`rules`] — reactive rules with dependency tracking, timers and
//!   sub-rules
//! - [`scheduler`] — background tasks with exponential backoff
//! - [`sync`] — sync frame broadcaster and client-side reconciler
//! - [`hub::Hub`] — composition root and the single event loop
//! - **Port traits** adapters implement: [`ports::KeyValueStore`],
//!   [`ports::SnapshotSource`]
//!
//! ## Dependency rule
//! Depends on `hearth-domain` only (plus `tokio` for channels and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the
//! reverse.

pub mod constraints;
pub mod devices;
pub mod handlers;
pub mod hub;
pub mod memory_store;
pub mod ports;
pub mod provider;
pub mod registry;
pub mod rules;
pub mod scheduler;
pub mod sync;
