use axum::{
    Json,
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
pub struct RequestMeta {
    pub request_id: String,
    pub request_at: String, // RFC3339
    pub timestamp: i64,     // unix seconds
}

impl RequestMeta {
    pub fn new() -> Self {
        let now: DateTime<Utc> = Utc::now();
        RequestMeta {
            request_id: Uuid::new_v4().to_string(),
            request_at: now.to_rfc3339(),
            timestamp: now.timestamp(),
        }
    }
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self::new()
    }
}

// Middleware: attaches RequestMeta into request extensions
pub async fn meta_middleware(mut req: Request<Body>, next: Next) -> Response {
    req.extensions_mut().insert(RequestMeta::new());
    next.run(req).await
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// Cuts `items` down to 1-based `page`. Pages past the end are empty.
pub fn paginate<T>(items: Vec<T>, page: u32, per_page: u32) -> (Vec<T>, Pagination) {
    let page = page.max(1);
    let per_page = per_page.max(1);
    let total = items.len() as u64;
    let total_pages = total.div_ceil(per_page as u64) as u32;

    let skip = (page as usize - 1).saturating_mul(per_page as usize);
    let items = items.into_iter().skip(skip).take(per_page as usize).collect();

    (
        items,
        Pagination {
            page,
            per_page,
            total,
            total_pages,
        },
    )
}

#[derive(Serialize)]
pub struct SuccessEnvelope<T> {
    pub message: String,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    pub meta: RequestMeta,
}

pub struct ApiOk<T> {
    status: StatusCode,
    body: SuccessEnvelope<T>,
}

impl<T> ApiOk<T> {
    fn with_status(status: StatusCode, message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self {
            status,
            body: SuccessEnvelope {
                message: message.into(),
                data,
                pagination: None,
                meta,
            },
        }
    }

    pub fn ok(message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self::with_status(StatusCode::OK, message, data, meta)
    }

    pub fn created(message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self::with_status(StatusCode::CREATED, message, data, meta)
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.body.pagination = Some(pagination);
        self
    }
}

impl<T: Serialize> IntoResponse for ApiOk<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
