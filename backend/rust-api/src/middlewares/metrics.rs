use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Response marker set by the router fallback.
#[derive(Clone, Copy, Debug)]
pub struct UnmatchedRoute;

const UNMATCHED_PATH: &str = "unmatched";

/// Records request count and latency per method, route and status.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let path = if response.extensions().get::<UnmatchedRoute>().is_some() {
        UNMATCHED_PATH.to_string()
    } else {
        path
    };
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Session-scoped quiz routes end in a session id; collapse it so label cardinality
/// stays bounded. Any other UUID-looking segment is collapsed as well.
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut normalized = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().copied().enumerate() {
        let follows_resource = i > 0
            && matches!(
                segments[i - 1],
                "session" | "question" | "results" | "progress"
            );
        if !segment.is_empty() && (follows_resource || is_uuid_like(segment)) {
            normalized.push("{id}");
        } else {
            normalized.push(segment);
        }
    }

    normalized.join("/")
}

fn is_uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}
