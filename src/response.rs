//! Standard response envelope helpers.

use axum::{http::StatusCode, Json};
use serde::Serialize;

/// `{result, success, info}` wrapper used by every route.
#[derive(Serialize, Debug)]
pub struct Envelope<T> {
    pub result: T,
    pub success: bool,
    pub info: Info,
}

#[derive(Serialize, Debug)]
pub struct Info {
    pub code: u16,
    pub message: serde_json::Value,
    pub session: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub total_pages: u64,
    pub total_results: u64,
}

impl Pagination {
    pub fn new(page: u64, page_length: u64, total_results: u64) -> Self {
        let total_pages = if page_length == 0 {
            0
        } else {
            total_results.div_ceil(page_length)
        };
        Pagination {
            page,
            total_pages,
            total_results,
        }
    }
}

pub fn wrap_result<T: Serialize>(
    status: StatusCode,
    result: T,
    message: impl Into<String>,
    session: Option<String>,
) -> (StatusCode, Json<Envelope<T>>) {
    (
        status,
        Json(Envelope {
            result,
            success: true,
            info: Info {
                code: status.as_u16(),
                message: serde_json::Value::String(message.into()),
                session,
                pagination: None,
            },
        }),
    )
}

pub fn wrap_page<T: Serialize>(
    result: Vec<T>,
    pagination: Pagination,
    message: impl Into<String>,
    session: Option<String>,
) -> (StatusCode, Json<Envelope<Vec<T>>>) {
    (
        StatusCode::OK,
        Json(Envelope {
            result,
            success: true,
            info: Info {
                code: StatusCode::OK.as_u16(),
                message: serde_json::Value::String(message.into()),
                session,
                pagination: Some(pagination),
            },
        }),
    )
}

pub fn wrap_error(info: Info) -> Envelope<Option<()>> {
    Envelope {
        result: None,
        success: false,
        info,
    }
}
