use axum::http::HeaderValue;
use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Assign each request an id, or adopt the caller's, and echo it on the
/// response so log lines and replies can be correlated.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match HeaderValue::from_str(&request_id) {
        Ok(value) => {
            req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
            let mut response = next.run(req).await;
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
            response
        }
        // An unrepresentable id from the caller is dropped rather than
        // propagated.
        Err(_) => next.run(req).await,
    }
}
