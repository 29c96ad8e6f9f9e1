use axum::{
    extract::{Path, State},
    Extension, Json,
};
use uuid::Uuid;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::lifecycle::{
    AutoPopulateOutcome, GenerateOutcome, GridView, InitOutcome, InitRequest, ScheduleListItem,
    TransitionOutcome, TransitionRequest,
};
use common::models::Caller;

/// Return the caller's open draft or create a new one
#[tracing::instrument(skip(state, req))]
pub async fn init_schedule(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    req: Option<Json<InitRequest>>,
) -> Result<Json<SuccessResponse<InitOutcome>>, ErrorResponse> {
    let force_new = req.map_or(false, |Json(r)| r.force_new);
    let outcome = state.service.init_schedule(&caller, force_new).await?;
    Ok(Json(SuccessResponse::new(outcome)))
}

/// List schedules in the caller's scope
#[tracing::instrument(skip(state))]
pub async fn list_schedules(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<SuccessResponse<Vec<ScheduleListItem>>>, ErrorResponse> {
    let schedules = state.service.list_schedules(&caller).await?;
    Ok(Json(SuccessResponse::new(schedules)))
}

/// Week grid of a schedule
#[tracing::instrument(skip(state))]
pub async fn get_grid(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<SuccessResponse<GridView>>, ErrorResponse> {
    let grid = state.service.get_grid(&caller, schedule_id).await?;
    Ok(Json(SuccessResponse::new(grid)))
}

/// Create placeholder sections for the level's internal courses
#[tracing::instrument(skip(state))]
pub async fn auto_populate(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<SuccessResponse<AutoPopulateOutcome>>, ErrorResponse> {
    let outcome = state
        .service
        .auto_populate_internal_sections(&caller, schedule_id)
        .await?;
    Ok(Json(SuccessResponse::new(outcome)))
}

/// Place pending sections from reasoning-service proposals
#[tracing::instrument(skip(state))]
pub async fn generate(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<SuccessResponse<GenerateOutcome>>, ErrorResponse> {
    let outcome = state.service.generate(&caller, schedule_id).await?;
    Ok(Json(SuccessResponse::new(outcome)))
}

fn note(req: Option<Json<TransitionRequest>>) -> Option<String> {
    req.and_then(|Json(r)| r.note)
}

#[tracing::instrument(skip(state, req))]
pub async fn share(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(schedule_id): Path<Uuid>,
    req: Option<Json<TransitionRequest>>,
) -> Result<Json<SuccessResponse<TransitionOutcome>>, ErrorResponse> {
    let outcome = state.service.share(&caller, schedule_id, note(req)).await?;
    Ok(Json(SuccessResponse::new(outcome)))
}

#[tracing::instrument(skip(state, req))]
pub async fn approve(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(schedule_id): Path<Uuid>,
    req: Option<Json<TransitionRequest>>,
) -> Result<Json<SuccessResponse<TransitionOutcome>>, ErrorResponse> {
    let outcome = state.service.approve(&caller, schedule_id, note(req)).await?;
    Ok(Json(SuccessResponse::new(outcome)))
}

#[tracing::instrument(skip(state, req))]
pub async fn finalize(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(schedule_id): Path<Uuid>,
    req: Option<Json<TransitionRequest>>,
) -> Result<Json<SuccessResponse<TransitionOutcome>>, ErrorResponse> {
    let outcome = state.service.finalize(&caller, schedule_id, note(req)).await?;
    Ok(Json(SuccessResponse::new(outcome)))
}

#[tracing::instrument(skip(state, req))]
pub async fn archive(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(schedule_id): Path<Uuid>,
    req: Option<Json<TransitionRequest>>,
) -> Result<Json<SuccessResponse<TransitionOutcome>>, ErrorResponse> {
    let outcome = state.service.archive(&caller, schedule_id, note(req)).await?;
    Ok(Json(SuccessResponse::new(outcome)))
}
