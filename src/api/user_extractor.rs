use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use std::sync::Arc;

use crate::logic::context::AppContext;
use crate::model::UserContext;

/// Axum extractor for UserContext from request headers
///
/// This extractor looks for user information in request headers:
/// - X-User-Id: user identifier, `anonymous` when absent
/// - X-User-Email: Optional user email
/// - X-User-Name: Optional user display name
/// - X-User-Permissions: comma separated grants; the configured
///   default permissions apply when the header is missing
#[async_trait]
impl FromRequestParts<Arc<AppContext>> for UserContext {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        Ok(user_from_headers(
            &parts.headers,
            &state.settings.default_permissions,
        ))
    }
}

fn user_from_headers(headers: &HeaderMap, default_permissions: &[String]) -> UserContext {
    let user = match extract_header_value(headers, "x-user-id") {
        Some(user_id) => UserContext::with_details(
            user_id,
            extract_header_value(headers, "x-user-email"),
            extract_header_value(headers, "x-user-name"),
        ),
        None => UserContext::default(),
    };
    match extract_header_value(headers, "x-user-permissions") {
        Some(raw) => user.with_permissions(raw.split(',').map(str::to_string)),
        None => user.with_permissions(default_permissions.iter().cloned()),
    }
}

/// Extract header value as string
fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
