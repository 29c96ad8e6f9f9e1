use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::lifecycle::{
    AddSlotOutcome, AddSlotRequest, ImportOutcome, RemoveSlotOutcome, UpdateSlotOutcome,
    UpdateSlotRequest,
};
use common::models::Caller;

/// Add a manual or external slot
///
/// The response names the schedule actually written, which differs from the
/// requested one when the slot was redirected.
#[tracing::instrument(skip(state, req), fields(course = %req.course_code))]
pub async fn add_slot(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<AddSlotRequest>,
) -> Result<(StatusCode, Json<SuccessResponse<AddSlotOutcome>>), ErrorResponse> {
    let outcome = state.service.add_slot(&caller, req).await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(outcome))))
}

/// Import a list of external slots, one result per row
#[tracing::instrument(skip(state, rows), fields(rows = rows.len()))]
pub async fn import_slots(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(rows): Json<Vec<AddSlotRequest>>,
) -> Result<Json<SuccessResponse<ImportOutcome>>, ErrorResponse> {
    let outcome = state.service.import_external_slots(&caller, rows).await?;
    Ok(Json(SuccessResponse::new(outcome)))
}

#[tracing::instrument(skip(state, req))]
pub async fn update_slot(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(slot_id): Path<Uuid>,
    Json(req): Json<UpdateSlotRequest>,
) -> Result<Json<SuccessResponse<UpdateSlotOutcome>>, ErrorResponse> {
    let outcome = state.service.update_slot(&caller, slot_id, req).await?;
    Ok(Json(SuccessResponse::new(outcome)))
}

#[tracing::instrument(skip(state))]
pub async fn remove_slot(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<SuccessResponse<RemoveSlotOutcome>>, ErrorResponse> {
    let outcome = state.service.remove_slot(&caller, slot_id).await?;
    Ok(Json(SuccessResponse::new(outcome)))
}
