use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{AppError, Result},
    models::session::Session,
    state::AppState,
};

/// The most field names accepted in one request.
const MAX_FIELDS: usize = 64;

/// A record and the names of the fields to transform.
#[derive(Deserialize, Debug)]
pub struct FieldsRequest {
    pub record: Value,
    pub fields: Vec<String>,
}

#[derive(Serialize)]
pub struct FieldsResponse {
    pub success: bool,
    pub record: Value,
}

fn field_names(request: &FieldsRequest) -> Result<Vec<&str>> {
    if request.fields.len() > MAX_FIELDS {
        return Err(AppError::Validation(format!(
            "At most {} fields may be named",
            MAX_FIELDS
        )));
    }
    Ok(request.fields.iter().map(String::as_str).collect())
}

/// Encrypts the named fields of a record.
pub async fn encrypt_fields(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(request): Json<FieldsRequest>,
) -> Result<Json<FieldsResponse>> {
    let names = field_names(&request)?;
    let record = state.fields.encrypt_user_fields(&request.record, &names)?;

    tracing::debug!(user_id = %session.user_id, fields = names.len(), "Record fields encrypted");

    Ok(Json(FieldsResponse {
        success: true,
        record,
    }))
}

/// Decrypts the named fields of a record. Fields that fail to decrypt are
/// returned unchanged.
pub async fn decrypt_fields(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(request): Json<FieldsRequest>,
) -> Result<Json<FieldsResponse>> {
    let names = field_names(&request)?;
    let record = state.fields.decrypt_user_fields(&request.record, &names);

    tracing::debug!(user_id = %session.user_id, fields = names.len(), "Record fields decrypted");

    Ok(Json(FieldsResponse {
        success: true,
        record,
    }))
}
