use axum::{
    body::Body,
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// HTTP header name for the sync session request ID
pub const SESSION_ID_HEADER: &str = "x-sync-session-id";

/// Extension type for storing the session request ID in request extensions
#[derive(Clone, Debug)]
pub struct SessionRequestId(pub Uuid);

impl SessionRequestId {
    /// Creates a new random session request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the UUID as a string
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

/// Middleware that generates or extracts a session request ID and adds it to
/// the request extensions. Also adds the ID to the response headers.
///
/// If the incoming request has an `x-sync-session-id` header, it will be
/// used. Otherwise, a new UUID v4 will be generated.
pub async fn session_id_middleware(mut request: Request, next: Next) -> Response {
    let session_id = request
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(SessionRequestId)
        .unwrap_or_else(SessionRequestId::new);

    request.extensions_mut().insert(session_id.clone());

    let mut response = next.run(request).await;

    if let Ok(header_value) = HeaderValue::from_str(&session_id.as_str()) {
        response
            .headers_mut()
            .insert(SESSION_ID_HEADER, header_value);
    }

    response
}

/// Helper function to create a tracing span with the session request ID
pub fn make_span_with_session_id(request: &Request<Body>) -> tracing::Span {
    let session_id = request
        .extensions()
        .get::<SessionRequestId>()
        .map(|id| id.as_str())
        .unwrap_or_else(|| "unknown".to_string());

    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        session_id = %session_id,
    )
}
