use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::{Error, Result};
use crate::models::*;

type ApiResult<T> = std::result::Result<T, (StatusCode, String)>;

// ============================================================
// Error Handling
// ============================================================

/// Map a service error to a status code.
///
/// Catalog and input errors are the caller's to fix and are returned as-is.
/// Storage failures are logged in full and the client only sees a generic
/// message.
fn error_response(e: Error) -> (StatusCode, String) {
    match e {
        Error::UnknownFeature(_) | Error::UnknownFeatureVersion { .. } => {
            (StatusCode::NOT_FOUND, e.to_string())
        }
        Error::VersionConflict { .. } => (StatusCode::CONFLICT, e.to_string()),
        Error::InvalidInput(_) => {
            tracing::warn!("Validation error: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string())
        }
        Error::StorageConflict(_) => {
            tracing::warn!("Conflict persisted after retries: {}", e);
            (
                StatusCode::CONFLICT,
                "Concurrent update, please retry".to_string(),
            )
        }
        Error::StorageUnavailable(_) => {
            tracing::error!("Internal error: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage unavailable".to_string(),
            )
        }
    }
}

/// Run `op` up to `attempts` times while it fails with a retryable error.
///
/// Grants and revocations look up before they write, so repeating one after
/// a lost race can't double-apply it.
pub fn retry_on_conflict<T>(attempts: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_retryable() && attempt < attempts => {
                tracing::debug!("Retrying after storage conflict (attempt {}): {}", attempt, e);
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn parse_name(name: &str) -> ApiResult<FeatureName> {
    FeatureName::parse(name).map_err(error_response)
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Catalog
// ============================================================

pub async fn list_catalog(State(state): State<AppState>) -> ApiResult<Json<Vec<Feature>>> {
    state
        .management
        .features()
        .catalog()
        .list()
        .map(Json)
        .map_err(error_response)
}

pub async fn get_latest_feature(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Feature>> {
    let name = parse_name(&name)?;
    state
        .management
        .features()
        .catalog()
        .resolve(name)
        .map(Json)
        .map_err(error_response)
}

pub async fn get_feature_version(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, u32)>,
) -> ApiResult<Json<Feature>> {
    let name = parse_name(&name)?;
    state
        .management
        .features()
        .catalog()
        .resolve_version(name, version)
        .map(Json)
        .map_err(error_response)
}

// ============================================================
// Assignments
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddFeatureInput {
    pub name: String,
    pub version: u32,
    pub reason: String,
}

pub async fn get_features(
    State(state): State<AppState>,
    Path((kind, id)): Path<(SubjectKind, String)>,
) -> ApiResult<Json<Vec<FeatureAssignment>>> {
    state
        .management
        .features()
        .get_features(&Subject { kind, id })
        .map(Json)
        .map_err(error_response)
}

pub async fn add_feature(
    State(state): State<AppState>,
    Path((kind, id)): Path<(SubjectKind, String)>,
    Json(input): Json<AddFeatureInput>,
) -> ApiResult<(StatusCode, Json<Assignment>)> {
    let name = parse_name(&input.name)?;
    let subject = Subject { kind, id };
    retry_on_conflict(state.conflict_retries, || {
        state
            .management
            .features()
            .add_feature(&subject, name, input.version, &input.reason)
    })
    .map(|a| (StatusCode::CREATED, Json(a)))
    .map_err(error_response)
}

// ============================================================
// Capabilities
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantCapabilityInput {
    /// Exact version to grant. Omit for the catalog's latest.
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "granted via api".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityStatus {
    pub subject: Subject,
    pub feature: FeatureName,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveCapabilityResponse {
    /// False when the subject held no active assignment.
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListSubjectsQuery {
    pub kind: Option<SubjectKind>,
}

pub async fn has_capability(
    State(state): State<AppState>,
    Path((kind, id, name)): Path<(SubjectKind, String, String)>,
) -> ApiResult<Json<CapabilityStatus>> {
    let name = parse_name(&name)?;
    let subject = Subject { kind, id };
    let enabled = state
        .management
        .has_capability(&subject, name)
        .map_err(error_response)?;
    Ok(Json(CapabilityStatus {
        subject,
        feature: name,
        enabled,
    }))
}

pub async fn add_capability(
    State(state): State<AppState>,
    Path((kind, id, name)): Path<(SubjectKind, String, String)>,
    Json(input): Json<GrantCapabilityInput>,
) -> ApiResult<(StatusCode, Json<Activation>)> {
    let name = parse_name(&name)?;
    let subject = Subject { kind, id };
    let activation = retry_on_conflict(state.conflict_retries, || {
        state
            .management
            .add_capability(&subject, name, input.version, &input.reason)
    })
    .map_err(error_response)?;

    let status = match activation {
        Activation::Created(_) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(activation)))
}

pub async fn remove_capability(
    State(state): State<AppState>,
    Path((kind, id, name)): Path<(SubjectKind, String, String)>,
) -> ApiResult<Json<RemoveCapabilityResponse>> {
    let name = parse_name(&name)?;
    let subject = Subject { kind, id };
    retry_on_conflict(state.conflict_retries, || {
        state.management.remove_capability(&subject, name)
    })
    .map(|removed| Json(RemoveCapabilityResponse { removed }))
    .map_err(error_response)
}

pub async fn list_capability_subjects(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ListSubjectsQuery>,
) -> ApiResult<Json<Vec<Subject>>> {
    let name = parse_name(&name)?;
    let mut subjects = state
        .management
        .list_capability_subjects(name)
        .map_err(error_response)?;
    if let Some(kind) = query.kind {
        subjects.retain(|s| s.kind == kind);
    }
    Ok(Json(subjects))
}

pub async fn can_early_access(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CapabilityStatus>> {
    let enabled = state
        .management
        .can_early_access(&id)
        .map_err(error_response)?;
    Ok(Json(CapabilityStatus {
        subject: Subject::user(id),
        feature: FeatureName::EarlyAccess,
        enabled,
    }))
}
