use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use jobrelay_core::OwnerId;
use jobrelay_infra::ApiKeyEntry;

use crate::app::errors::json_error;
use crate::context::OwnerContext;

#[derive(Clone)]
pub struct AuthState {
    keys: Arc<HashMap<String, OwnerId>>,
}

impl AuthState {
    pub fn new(entries: &[ApiKeyEntry]) -> Self {
        let keys = entries.iter().map(|e| (e.key.clone(), e.owner)).collect();
        Self { keys: Arc::new(keys) }
    }

    fn owner_for(&self, key: &str) -> Option<OwnerId> {
        self.keys.get(key).copied()
    }
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let unauthorized = |msg: &str| json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg);

    let key = extract_bearer(req.headers()).ok_or_else(|| unauthorized("missing bearer token"))?;
    let owner = state
        .owner_for(key)
        .ok_or_else(|| unauthorized("unknown api key"))?;

    req.extensions_mut().insert(OwnerContext::new(owner));
    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let token = header.to_str().ok()?.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer k-123"));
        assert_eq!(extract_bearer(&headers), Some("k-123"));
    }
}
