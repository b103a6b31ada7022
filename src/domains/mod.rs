//! Domains module containing business logic organized by bounded contexts.
//!
//! Each subdomain represents a specific area of functionality within the
//! gateway, following Domain-Driven Design principles for better
//! organization and scalability.

pub mod capabilities;
pub mod resilience;
pub mod sessions;
