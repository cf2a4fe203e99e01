use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, OptionalFromRequest, Request},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};

use crate::handlers::ApiError;

/// JSON extractor whose rejections use the API error envelope.
///
/// Well-formed bodies with missing or mistyped fields are validation errors; anything
/// that is not parseable JSON is `INVALID_JSON`.
///
/// As `Option<AppJson<T>>` an empty body yields `None`.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match <Json<T> as FromRequest<S>>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(reject_body(rejection)),
        }
    }
}

impl<T, S> OptionalFromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        let json_content = has_json_content_type(req.headers());
        let body = <Bytes as FromRequest<S>>::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        if !json_content {
            tracing::warn!("Rejected request body without a JSON content type");
            return Err(ApiError::invalid_json(
                "Expected request with `Content-Type: application/json`",
            )
            .into_response());
        }

        match Json::<T>::from_bytes(&body) {
            Ok(Json(value)) => Ok(Some(AppJson(value))),
            Err(rejection) => Err(reject_body(rejection)),
        }
    }
}

fn has_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json"
                || (mime.starts_with("application/") && mime.ends_with("+json"))
        })
        .unwrap_or(false)
}

fn reject_body(rejection: JsonRejection) -> Response {
    let message = rejection.body_text();
    tracing::warn!("Rejected request body: {}", message);
    let error = match rejection {
        JsonRejection::JsonDataError(_) => ApiError::bad_request(message),
        _ => ApiError::invalid_json(message),
    };
    error.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Payload {
        name: String,
    }

    fn request(content_type: Option<&str>, body: &'static str) -> Request {
        let mut builder = Request::builder().method("POST").uri("/");
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn optional(req: Request) -> Result<Option<AppJson<Payload>>, Response> {
        <AppJson<Payload> as OptionalFromRequest<()>>::from_request(req, &()).await
    }

    #[tokio::test]
    async fn empty_body_is_absent() {
        assert!(optional(request(None, "")).await.unwrap().is_none());
        assert!(optional(request(Some("application/json"), "  \n"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn json_body_is_parsed() {
        let parsed = optional(request(
            Some("application/json; charset=utf-8"),
            r#"{"name":"quiz"}"#,
        ))
        .await
        .unwrap()
        .unwrap();
        assert_eq!(parsed.0.name, "quiz");
    }

    #[tokio::test]
    async fn malformed_body_is_still_rejected() {
        let response = optional(request(Some("application/json"), "{bad"))
            .await
            .err()
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = optional(request(None, r#"{"name":"quiz"}"#))
            .await
            .err()
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn json_content_types() {
        let mut headers = HeaderMap::new();
        assert!(!has_json_content_type(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        assert!(has_json_content_type(&headers));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!has_json_content_type(&headers));
    }
}
