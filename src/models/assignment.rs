use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::feature::{Feature, FeatureName};
use super::subject::Subject;

/// A subject's grant of one feature version.
///
/// Rows are never deleted. Removing a feature flips `activated` off, and
/// granting it again flips the same row back on, so `id` survives a
/// remove/add cycle. For a given subject and feature name at most one row is
/// active at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub id: Uuid,
    pub subject: Subject,
    pub feature_name: FeatureName,
    pub feature_version: u32,
    pub activated: bool,
    /// Why the feature was granted.
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// An assignment together with the catalog definition it references.
///
/// The assignment fields are flattened into the JSON response, with an
/// additional `feature` object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureAssignment {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub feature: Feature,
}

/// How "ensure active" satisfied a grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", content = "assignment", rename_all = "snake_case")]
pub enum Activation {
    /// The subject already had an active assignment; nothing was written.
    Found(Assignment),
    /// A previously removed assignment was switched back on.
    Reactivated(Assignment),
    /// No reusable row existed, so a new one was inserted.
    Created(Assignment),
}

impl Activation {
    pub fn assignment(&self) -> &Assignment {
        match self {
            Self::Found(a) | Self::Reactivated(a) | Self::Created(a) => a,
        }
    }

    /// True when the call changed stored state.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Found(_))
    }
}
