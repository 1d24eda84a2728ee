//! # hearth-domain
//!
//! Pure domain model for the hearth home automation hub.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Describe **Services** (controllable units with typed properties,
//!   actions and events) and their current values
//! - Infer **Devices** by merging services that share identifiers
//! - Arbitrate **Constraints** (prioritized overrides of a property)
//! - Define the **HubEvent** bus vocabulary and the **sync frames** streamed
//!   to remote observers
//! - Define **rule scripts** (rule bodies expressed as data)
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.

pub mod error;
pub mod id;
pub mod time;

pub mod constraint;
pub mod device;
pub mod event;
pub mod identifier;
pub mod schema;
pub mod script;
pub mod service;
pub mod sync;
