use axum::body::Body;
use axum::http::{header, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;

/// content-length threshold above which a request counts as a large upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedUploadThreshold(pub u64);

/// request marker: this body is big enough that it should have been chunked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LargeUpload {
    pub content_length: u64,
}

/// Flag requests whose declared size exceeds the configured threshold.
/// Routing hint only; nothing is rejected here.
pub async fn flag_large_uploads(mut req: Request<Body>, next: Next) -> Response {
    // threshold is set as an extension during router setup
    let threshold = req.extensions().get::<ChunkedUploadThreshold>().map(|t| t.0);

    let content_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    if let (Some(threshold), Some(content_length)) = (threshold, content_length) {
        if content_length > threshold {
            tracing::debug!(
                "Request of {} bytes exceeds chunked threshold of {} bytes",
                content_length,
                threshold
            );
            req.extensions_mut().insert(LargeUpload { content_length });
        }
    }

    next.run(req).await
}

/// headers for everything we serve
pub async fn add_security_headers(
    req: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; img-src 'self' data:; media-src 'self'"),
    );

    response
}
