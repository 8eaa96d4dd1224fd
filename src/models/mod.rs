//! Domain models for the entitlement engine.
//!
//! - [`Feature`]: an immutable `(name, version, configuration)` definition
//!   owned by the catalog.
//! - [`Subject`]: a user or workspace a feature is granted to.
//! - [`Assignment`]: a subject's grant of one feature version, with an
//!   activation flag. Assignments are soft-deleted, never removed, so a
//!   subject's full history stays readable.
//! - [`Activation`]: which branch of "ensure active" satisfied a grant.

mod assignment;
mod feature;
mod subject;

pub use assignment::*;
pub use feature::*;
pub use subject::*;
