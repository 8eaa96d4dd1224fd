//! Feature entitlements: which named features each user and workspace holds,
//! why, and since when.
//!
//! The [`db::FeatureCatalog`] owns immutable feature definitions, the
//! [`db::AssignmentStore`] keeps every grant ever made, and the
//! [`service::FeatureManagementService`] turns them into idempotent
//! grant/revoke/check operations. [`api`] exposes those over HTTP.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;

pub use error::{Error, Result};
