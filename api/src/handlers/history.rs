use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::{Caller, HistoryEntry, HistoryFilter, HistorySummary, Page, ScheduleStatus};

/// Query parameters for the history listing
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub schedule_id: Option<Uuid>,
    pub level: Option<i32>,
    pub group_no: Option<i32>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl HistoryQuery {
    fn into_filter(self) -> Result<HistoryFilter, ErrorResponse> {
        let status = self
            .status
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<ScheduleStatus>())
            .transpose()
            .map_err(|e| ErrorResponse::new("validation_error", e))?;

        Ok(HistoryFilter {
            schedule_id: self.schedule_id,
            level: self.level,
            group_no: self.group_no,
            status,
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or(HistoryFilter::DEFAULT_LIMIT),
        })
    }
}

/// List history entries, most recent first
#[tracing::instrument(skip(state))]
pub async fn list_history(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<SuccessResponse<Page<HistorySummary>>>, ErrorResponse> {
    let filter = query.into_filter()?;
    let page = state.service.list_history(&caller, filter).await?;
    Ok(Json(SuccessResponse::new(page)))
}

/// One history entry with its snapshot and diff
#[tracing::instrument(skip(state))]
pub async fn get_history(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(history_id): Path<Uuid>,
) -> Result<Json<SuccessResponse<HistoryEntry>>, ErrorResponse> {
    let entry = state.service.get_history(&caller, history_id).await?;
    Ok(Json(SuccessResponse::new(entry)))
}
