//! Bearer-token principal resolution

use std::sync::Arc;

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Uri};
use cohome_core::storage::UserRepository;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Query string fallback for clients that cannot set headers (EventSource)
#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Uuid);

/// Token from `Authorization: Bearer`, falling back to `?token=`
pub fn bearer_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    // A query that does not parse simply carries no token
    let query = Query::<TokenQuery>::try_from_uri(uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    query.token.filter(|t| !t.is_empty())
}

/// Resolve the caller behind a request
pub fn authenticate(state: &AppState, headers: &HeaderMap, uri: &Uri) -> Result<Uuid, ApiError> {
    let token =
        bearer_token(headers, uri).ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

    let found = state.db().find_valid_token(&token)?;
    match found {
        Some(auth) => Ok(auth.user_id),
        None => {
            debug!("Rejected unknown or expired token");
            Err(ApiError::unauthorized("invalid or expired token"))
        }
    }
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authenticate(state, &parts.headers, &parts.uri).map(CurrentUser)
    }
}
