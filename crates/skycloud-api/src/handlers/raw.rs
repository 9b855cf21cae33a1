//! Raw file serving with single byte-range support.

use crate::error::HttpAppError;
use crate::password::verify_password;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use skycloud_core::AppError;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct RawQuery {
    pub pw: Option<String>,
}

/// Inclusive byte range requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-end`, `end` clamped later
    FromTo(u64, u64),
    /// `bytes=start-`
    From(u64),
    /// `bytes=-n`: the last `n` bytes
    Suffix(u64),
}

impl ByteRange {
    /// Parse a `Range` header. Multi-range and malformed values yield `None`, which
    /// means the whole file is served.
    pub fn parse(value: &str) -> Option<Self> {
        let ranges = value.trim().strip_prefix("bytes=")?;
        if ranges.contains(',') {
            return None;
        }
        let (start, end) = ranges.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        match (start.is_empty(), end.is_empty()) {
            (true, false) => end.parse().ok().map(ByteRange::Suffix),
            (false, true) => start.parse().ok().map(ByteRange::From),
            (false, false) => {
                let start: u64 = start.parse().ok()?;
                let end: u64 = end.parse().ok()?;
                (start <= end).then_some(ByteRange::FromTo(start, end))
            }
            (true, true) => None,
        }
    }

    /// Resolve against the object size. `None` when unsatisfiable.
    pub fn resolve(self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        let last = size - 1;
        match self {
            ByteRange::FromTo(start, end) if start <= last => Some((start, end.min(last))),
            ByteRange::From(start) if start <= last => Some((start, last)),
            ByteRange::Suffix(n) if n > 0 => Some((size.saturating_sub(n), last)),
            _ => None,
        }
    }
}

fn build_response(builder: axum::http::response::Builder, body: Body) -> Result<Response, HttpAppError> {
    builder.body(body).map_err(|e| {
        tracing::error!(error = %e, "Failed to build response");
        HttpAppError::from(AppError::Internal(e.to_string()))
    })
}

#[tracing::instrument(skip(state, query, headers), fields(operation = "serve_raw"))]
pub async fn serve_raw(
    Path(name): Path<String>,
    Query(query): Query<RawQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    let not_found = || AppError::NotFound(format!("File {} not found", name));

    let file = state
        .repository
        .get_by_name(&name)
        .await?
        .ok_or_else(not_found)?;

    // Pending deletion by the next sweep.
    if file.is_expired(Utc::now()) || file.has_reached_max_views() {
        return Err(not_found().into());
    }

    if let Some(hash) = &file.password {
        let supplied = query.pw.as_deref().unwrap_or_default();
        if supplied.is_empty() || !verify_password(supplied, hash)? {
            return Err(AppError::Unauthorized("Password required".to_string()).into());
        }
    }

    let requested = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ByteRange::parse);

    let response = match requested {
        Some(range) => {
            let size = state.storage.size(&file.name).await;
            let Some((start, end)) = range.resolve(size) else {
                return build_response(
                    Response::builder()
                        .status(StatusCode::RANGE_NOT_SATISFIABLE)
                        .header(header::CONTENT_RANGE, format!("bytes */{}", size)),
                    Body::empty(),
                );
            };

            let stream = state.storage.range(&file.name, start, end).await?;
            let body_stream = stream.map(|result| {
                result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
            });

            build_response(
                Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_TYPE, file.mimetype.as_str())
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, size))
                    .header(header::CONTENT_LENGTH, end - start + 1),
                Body::from_stream(body_stream),
            )?
        }
        None => {
            let stream = state.storage.get(&file.name).await?.ok_or_else(not_found)?;
            let body_stream = stream.map(|result| {
                result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
            });

            build_response(
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, file.mimetype.as_str())
                    .header(header::ACCEPT_RANGES, "bytes"),
                Body::from_stream(body_stream),
            )?
        }
    };

    // Continuation ranges of the same view are not counted again.
    let counts_as_view = match requested {
        None => true,
        Some(range) => matches!(range, ByteRange::From(0) | ByteRange::FromTo(0, _)),
    };
    if counts_as_view {
        let views = state.repository.increment_view_count(file.id).await?;
        tracing::debug!(file_id = %file.id, views, "File viewed");
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_range_forms() {
        assert_eq!(ByteRange::parse("bytes=0-99"), Some(ByteRange::FromTo(0, 99)));
        assert_eq!(ByteRange::parse("bytes=100-"), Some(ByteRange::From(100)));
        assert_eq!(ByteRange::parse("bytes=-50"), Some(ByteRange::Suffix(50)));
        assert_eq!(ByteRange::parse("bytes=5-1"), None);
        assert_eq!(ByteRange::parse("bytes=0-1,4-5"), None);
        assert_eq!(ByteRange::parse("items=0-1"), None);
        assert_eq!(ByteRange::parse("bytes=-"), None);
    }

    #[test]
    fn resolves_against_size() {
        assert_eq!(ByteRange::FromTo(0, 999).resolve(100), Some((0, 99)));
        assert_eq!(ByteRange::From(90).resolve(100), Some((90, 99)));
        assert_eq!(ByteRange::Suffix(10).resolve(100), Some((90, 99)));
        assert_eq!(ByteRange::Suffix(500).resolve(100), Some((0, 99)));
        assert_eq!(ByteRange::From(100).resolve(100), None);
        assert_eq!(ByteRange::FromTo(0, 0).resolve(0), None);
        assert_eq!(ByteRange::Suffix(0).resolve(100), None);
    }
}
