//! Request/response handlers
//!
//! Mutations go through the coordinator under the database lock. Fan-out
//! runs before the lock is released, so broadcasts leave in commit order,
//! and a failed delivery never fails the request.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use cohome_core::{
    Applied, CompletionStatus, CostBaseline, IntentionView, ParticipantStatus, ParticipantUpdate,
    SessionSnapshot, Transition,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{authenticate, CurrentUser};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::gateway::PresenceSink;
use crate::protocol::PushMessage;
use crate::registry::SessionRegistry;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

fn required<T>(value: Option<T>, field: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::validation(format!("missing field: {field}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetIntentionsRequest {
    pub calculation_id: Option<Uuid>,
    pub desired_percentage: Option<f64>,
    pub max_percentage: Option<f64>,
}

/// POST /api/intentions
pub async fn set_intentions(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<SetIntentionsRequest>,
) -> ApiResult<Json<Value>> {
    let calculation_id = required(req.calculation_id, "calculationId")?;
    let desired = required(req.desired_percentage, "desiredPercentage")?;
    let max = required(req.max_percentage, "maxPercentage")?;

    let intention = state
        .with_coordinator(|co| co.set_intentions(calculation_id, user_id, desired, max))?;
    Ok(Json(json!({ "success": true, "intention": intention })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPropertyQuery {
    pub group_id: Uuid,
    pub property_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentionsResponse {
    pub calculation_id: Uuid,
    pub intentions: Vec<IntentionView>,
    pub all_set: bool,
}

/// GET /api/intentions?groupId&propertyId
pub async fn get_intentions(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ApiQuery(q): ApiQuery<GroupPropertyQuery>,
) -> ApiResult<Json<IntentionsResponse>> {
    let response = state.with_coordinator(|co| {
        let calculation = co.get_or_create_calculation(q.group_id, q.property_id, user_id, None)?;
        let intentions = co.get_intentions(calculation.id, user_id)?;
        Ok(IntentionsResponse {
            calculation_id: calculation.id,
            all_set: cohome_core::intentions_complete(&intentions),
            intentions,
        })
    })?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub group_id: Option<Uuid>,
    pub property_id: Option<Uuid>,
    #[serde(default)]
    pub initial_costs: Option<CostBaseline>,
}

/// POST /api/negotiations
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<CreateSessionRequest>,
) -> ApiResult<Json<Value>> {
    let group_id = required(req.group_id, "groupId")?;
    let property_id = required(req.property_id, "propertyId")?;

    let (calculation, session) = state.with_coordinator(|co| {
        co.start_negotiation(group_id, property_id, user_id, req.initial_costs)
    })?;
    Ok(Json(json!({
        "sessionId": session.id,
        "calculationId": calculation.id,
    })))
}

/// GET /api/negotiations/status?groupId&propertyId
pub async fn completion_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ApiQuery(q): ApiQuery<GroupPropertyQuery>,
) -> ApiResult<Json<CompletionStatus>> {
    let status =
        state.with_coordinator(|co| co.completion_status(q.group_id, q.property_id, user_id))?;
    Ok(Json(status))
}

/// GET /api/negotiations/{id}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ApiPath(session_id): ApiPath<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    let snapshot = state.with_coordinator(|co| co.get_session(session_id, user_id))?;
    Ok(Json(snapshot))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateParticipantRequest {
    #[serde(default)]
    pub current_percentage: Option<f64>,
    #[serde(default)]
    pub status: Option<ParticipantStatus>,
    #[serde(default)]
    pub is_online: Option<bool>,
}

impl UpdateParticipantRequest {
    fn update(&self) -> ParticipantUpdate {
        ParticipantUpdate {
            percentage: self.current_percentage,
            status: self.status,
        }
    }
}

/// PATCH /api/negotiations/{id}/participant
pub async fn update_participant(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ApiPath(session_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateParticipantRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let update = req.update();

    if update.is_empty() {
        let Some(is_online) = req.is_online else {
            return Err(ApiError::validation(
                "provide currentPercentage, status or isOnline",
            ));
        };
        // Presence-only update: nothing to negotiate or broadcast
        let snapshot = state.with_coordinator(|co| {
            co.get_session(session_id, user_id)?;
            co.set_online(session_id, user_id, is_online)?;
            co.get_session(session_id, user_id)
        })?;
        return Ok(Json(snapshot));
    }

    // Fan-out happens under the database lock so clients see updates in commit order
    let snapshot = state.with_coordinator(|co| {
        if let Some(is_online) = req.is_online {
            co.set_online(session_id, user_id, is_online)?;
        }
        let outcome = co.update_participant(session_id, user_id, update)?;
        broadcast_applied(state.registry(), session_id, user_id, &update, &outcome.applied);
        Ok(outcome.snapshot)
    })?;

    Ok(Json(snapshot))
}

/// Push an accepted update to everyone else, and the lock to everyone
fn broadcast_applied(
    registry: &SessionRegistry,
    session_id: Uuid,
    user_id: Uuid,
    update: &ParticipantUpdate,
    applied: &Applied,
) {
    let participant = &applied.participant;
    let msg = match update.percentage {
        Some(_) => PushMessage::percentage_update(
            user_id,
            participant.current_percentage,
            participant.status,
        ),
        None => PushMessage::status_change(user_id, participant.status),
    };
    let delivered = registry.broadcast(session_id, &msg, Some(user_id));
    debug!(session_id = %session_id, kind = msg.kind(), delivered, "Update broadcast");

    if let Some(distribution) = &applied.distribution {
        let done = PushMessage::negotiation_completed(
            session_id,
            distribution.locked_at,
            distribution.shares.clone(),
        );
        registry.broadcast(session_id, &done, None);
        info!(session_id = %session_id, "Lock broadcast");
    }
}

/// POST /api/negotiations/{id}/abandon
pub async fn abandon_session(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ApiPath(session_id): ApiPath<Uuid>,
) -> ApiResult<Json<Transition>> {
    let transition = state.with_coordinator(|co| {
        let transition = co.abandon_session(session_id, user_id)?;
        state.registry().broadcast(
            session_id,
            &PushMessage::negotiation_abandoned(session_id, user_id),
            None,
        );
        Ok(transition)
    })?;
    Ok(Json(transition))
}

/// GET /api/negotiations/{id}/history
pub async fn session_history(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    ApiPath(session_id): ApiPath<Uuid>,
) -> ApiResult<Json<Value>> {
    let transitions = state.with_coordinator(|co| co.session_history(session_id, user_id))?;
    Ok(Json(json!({ "sessionId": session_id, "transitions": transitions })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub user_id: Uuid,
}

/// GET /api/negotiations/{id}/events?userId=
pub async fn session_events(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<Uuid>,
    ApiQuery(q): ApiQuery<EventsQuery>,
    headers: HeaderMap,
    uri: Uri,
) -> ApiResult<impl IntoResponse> {
    let presence = if state.is_sandbox(session_id) {
        debug!(session_id = %session_id, "Sandbox session, skipping auth");
        None
    } else {
        let caller = authenticate(&state, &headers, &uri)?;
        if caller != q.user_id {
            return Err(ApiError::unauthorized("userId does not match the caller"));
        }
        state.with_coordinator(|co| co.get_session(session_id, caller))?;
        Some(state.clone() as Arc<dyn PresenceSink>)
    };

    let conn = state.gateway().open(session_id, q.user_id, presence);
    let events = conn.into_events(state.subscribe_shutdown());
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "sessions": state.registry().session_count(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_request_accepts_camel_case() {
        let req: UpdateParticipantRequest =
            serde_json::from_str(r#"{"currentPercentage": 36, "status": "confirmed"}"#).unwrap();
        let update = req.update();
        assert_eq!(update.percentage, Some(36.0));
        assert_eq!(update.status, Some(ParticipantStatus::Confirmed));
        assert_eq!(req.is_online, None);
    }

    #[test]
    fn test_presence_only_request_is_not_an_update() {
        let req: UpdateParticipantRequest = serde_json::from_str(r#"{"isOnline": true}"#).unwrap();
        assert!(req.update().is_empty());
    }

    #[test]
    fn test_missing_field_is_validation() {
        let err = required::<Uuid>(None, "calculationId").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
