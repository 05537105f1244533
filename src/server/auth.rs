use super::AppState;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::convert::Infallible;

/// Caller resolved from the `Authorization` header, `None` when anonymous.
///
/// Bad credentials are not rejected here; they resolve to anonymous and the
/// access decision for the route produces the challenge.
pub struct CurrentUser(pub Option<String>);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(CurrentUser(
            state.identities.resolve(authorization(&parts.headers).as_deref()),
        ))
    }
}

pub fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// 401 with an empty body, the only shape git retries with credentials
pub fn challenge(realm: &str) -> Response {
    let mut response = StatusCode::UNAUTHORIZED.into_response();
    add_challenge(&mut response, realm);
    response
}

pub fn add_challenge(response: &mut Response, realm: &str) {
    if let Ok(value) = HeaderValue::from_str(&format!("Basic realm={}", realm)) {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    }
}
