//! File-serving gate
//!
//! Sits in front of the static file service. The access token comes from
//! the `fid` query parameter or the `F-Id` header.

use crate::api::AppState;
use crate::auth::{Rejection, Verdict};
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Query, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

pub const TOKEN_QUERY_PARAM: &str = "fid";
pub const TOKEN_HEADER: &str = "F-Id";

/// Address of the requesting client: the first `X-Forwarded-For` entry,
/// else the peer address when the server records it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let peer = || {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        };
        Ok(ClientAddr(forwarded.or_else(peer)))
    }
}

pub async fn file_gate(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    client: ClientAddr,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let token = params.get(TOKEN_QUERY_PARAM).map(String::as_str).or_else(|| {
        headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
    });

    // The file service decodes the path the same way before resolving it
    let raw_path = request.uri().path();
    let path = percent_decode_str(raw_path)
        .decode_utf8()
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| raw_path.to_string());

    match state.access.verify_request(token, client.0.as_deref(), &path) {
        Verdict::Accepted(claims) => {
            tracing::debug!(path = %request.uri().path(), ipc = %claims.ipc, "file access granted");
            next.run(request).await
        }
        Verdict::Rejected(Rejection::Missing) => {
            deny(StatusCode::UNAUTHORIZED, "Oops !")
        }
        Verdict::Rejected(reason) => {
            tracing::warn!(
                path = %request.uri().path(),
                client = ?client.0,
                reason = %reason,
                "file access rejected"
            );
            deny(StatusCode::FORBIDDEN, "Access denied !")
        }
    }
}

fn deny(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "message": message }))).into_response()
}
