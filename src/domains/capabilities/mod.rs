//! Capabilities domain module.
//!
//! A capability is a named, schema-described, executable unit of platform
//! functionality. This module owns everything between a raw call request
//! and an executable behavior:
//!
//! - `capability.rs` - the `Capability` trait and immutable descriptor
//! - `context.rs` - per-call context and the result envelope
//! - `schema.rs` - typed parameter specs and wire schema conversion
//! - `validation.rs` - argument validation/normalization (all violations)
//! - `permission.rs` - fail-closed scope filtering
//! - `registry.rs` - the process-wide catalog with lazy manifest loading
//! - `definitions/` - concrete capabilities (one file per group)
//!
//! ## Adding a New Capability
//!
//! 1. Create or extend a group file in `definitions/`
//! 2. Build a `CapabilityDescriptor` (name, scope, service, params)
//! 3. Implement the `Capability` trait
//! 4. Add it to the manifest in `definitions/mod.rs`
//!
//! The session manager and adapter pick it up through the registry; no
//! other file changes.

pub mod capability;
pub mod context;
pub mod definitions;
mod error;
pub mod permission;
pub mod registry;
pub mod schema;
pub mod validation;

pub use capability::{Capability, CapabilityDescriptor, to_tool};
pub use context::{CallContext, CallResult, Principal};
pub use error::CapabilityError;
pub use registry::CapabilityRegistry;
pub use schema::{FieldKind, FieldSpec, ParamSpec};
pub use validation::{Violation, validate};
