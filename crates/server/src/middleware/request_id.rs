use std::{fmt, time::Instant};

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, header::HeaderName},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_CALLER_ID_LEN: usize = 64;

/// Correlation id for one HTTP exchange, available to handlers as an `Extension`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// Reuse the caller's `x-request-id` when it is short and made of
    /// `[A-Za-z0-9._-]`; otherwise mint a UUID.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let caller = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| is_acceptable(id));
        match caller {
            Some(id) => Self(id.to_string()),
            None => Self(Uuid::new_v4().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_acceptable(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CALLER_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Tag each request with a [`RequestId`], echo it on the response and log
/// the exchange once it completes. Server errors are logged as warnings.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::from_headers(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    request.extensions_mut().insert(request_id.clone());

    let started = Instant::now();
    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis();

    if status.is_server_error() {
        tracing::warn!(
            "[HTTP] {} {} -> {} in {}ms (request {})",
            method,
            path,
            status.as_u16(),
            elapsed_ms,
            request_id
        );
    } else {
        tracing::debug!(
            "[HTTP] {} {} -> {} in {}ms (request {})",
            method,
            path,
            status.as_u16(),
            elapsed_ms,
            request_id
        );
    }

    if let Some(value) = request_id.header_value() {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::{
        Extension,
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;

    fn app() -> axum::Router {
        axum::Router::new()
            .route(
                "/whoami",
                axum::routing::get(|Extension(id): Extension<RequestId>| async move { id.to_string() }),
            )
            .route(
                "/broken",
                axum::routing::get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .layer(axum::middleware::from_fn(request_id_middleware))
    }

    async fn call(path: &str, caller_id: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(path);
        if let Some(id) = caller_id {
            builder = builder.header(REQUEST_ID_HEADER, id);
        }
        app().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
    }

    fn echoed(response: &Response) -> String {
        response.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_caller_id_reaches_handler_and_response() {
        let response = call("/whoami", Some("run-7f3a.retry_2")).await;

        assert_eq!(echoed(&response), "run-7f3a.retry_2");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"run-7f3a.retry_2");
    }

    #[tokio::test]
    async fn test_unusable_caller_ids_are_replaced() {
        let too_long = "a".repeat(MAX_CALLER_ID_LEN + 1);
        for id in [None, Some(""), Some("   "), Some("has spaces"), Some("semi;colon"), Some(too_long.as_str())] {
            let response = call("/whoami", id).await;
            let assigned = echoed(&response);
            assert!(Uuid::parse_str(&assigned).is_ok(), "{id:?} kept as {assigned}");
        }
    }

    #[tokio::test]
    async fn test_error_responses_are_tagged() {
        let response = call("/broken", Some("batch-9")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(echoed(&response), "batch-9");
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(" job-12 "));
        assert_eq!(RequestId::from_headers(&headers).as_str(), "job-12");
    }
}
