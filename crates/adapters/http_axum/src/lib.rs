//! # hearth-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Serve the **JSON API** over the hub: list services and devices, write
//!   properties, invoke actions, inspect and toggle rules
//! - Stream **sync frames** as Server-Sent Events, and stamp every snapshot
//!   response with the sync cursor (`x-hearth-instance`,
//!   `x-hearth-counter`) so clients can reconcile the two
//! - Map hub results into HTTP responses
//!
//! ## Dependency rule
//! Depends on `hearth-app` (for the hub) and `hearth-domain` (for types used
//! in request/response mapping). Never leaks axum types into the core.

pub mod api;
pub mod error;
pub mod router;
pub mod state;
