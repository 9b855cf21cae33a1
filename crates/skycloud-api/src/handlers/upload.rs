//! Upload endpoint.
//!
//! The request body is the file itself or, when `content-range` is present, one chunk
//! of a resumable upload. Options come from the `x-skycloud-*` headers.

use crate::error::HttpAppError;
use crate::password::hash_password;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use skycloud_core::models::{FileNameFormat, FileRecord, NewFileRecord, UploadOptions};
use skycloud_core::AppError;
use skycloud_processing::compression::{compress_image, is_compressible, COMPRESSED_MIMETYPE};
use skycloud_processing::{parse_upload_headers, AssembledUpload, ChunkOutcome};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const DEFAULT_MIMETYPE: &str = "application/octet-stream";
const DEFAULT_ORIGINAL_NAME: &str = "upload";
const MAX_NAME_ATTEMPTS: usize = 5;

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub mimetype: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub files: Vec<UploadedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletes_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialUploadResponse {
    pub partial_success: bool,
    pub partial_identifier: String,
    pub received: u64,
    pub total: u64,
}

#[tracing::instrument(skip(state, headers, body), fields(operation = "upload", size_bytes = body.len()))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpAppError> {
    let options = parse_upload_headers(&headers, state.config.files())?;

    let record = match &options.partial {
        Some(partial) => match state.reassembler.accept_chunk(partial, body).await? {
            ChunkOutcome::Accepted {
                identifier,
                received,
                total,
            } => {
                return Ok(Json(PartialUploadResponse {
                    partial_success: true,
                    partial_identifier: identifier,
                    received,
                    total,
                })
                .into_response());
            }
            ChunkOutcome::Assembled(upload) => finalize_chunked(&state, &options, upload).await?,
        },
        None => store_whole(&state, &headers, &options, body).await?,
    };

    let url = file_url(&state, &options, &record.name);
    tracing::info!(
        file_id = %record.id,
        name = %record.name,
        mimetype = %record.mimetype,
        size_bytes = record.size,
        "File uploaded"
    );

    if options.no_json {
        return Ok((StatusCode::OK, url).into_response());
    }

    Ok(Json(UploadResponse {
        files: vec![UploadedFile {
            id: record.id,
            name: record.name,
            url,
            mimetype: record.mimetype,
        }],
        deletes_at: record.deletes_at,
    })
    .into_response())
}

async fn store_whole(
    state: &AppState,
    headers: &HeaderMap,
    options: &UploadOptions,
    body: Bytes,
) -> Result<FileRecord, AppError> {
    if body.is_empty() {
        return Err(AppError::validation("content-length", "No file provided"));
    }
    let max = state.config.max_file_size_bytes();
    if body.len() as u64 > max {
        return Err(AppError::PayloadTooLarge(format!(
            "Upload of {} bytes exceeds the maximum of {} bytes",
            body.len(),
            max
        )));
    }

    let original_name = original_name(headers);
    let mut mimetype = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_MIMETYPE.to_string());

    let mut data = body;
    let mut name_options = options.clone();

    if let Some(percent) = options.image_compression_percent {
        if is_compressible(&mimetype) {
            let start = Instant::now();
            let input = data.clone();
            let compressed = tokio::task::spawn_blocking(move || compress_image(&input, percent))
                .await
                .map_err(|e| AppError::Internal(format!("Compression task failed: {}", e)))?;

            match compressed {
                Ok(bytes) => {
                    tracing::debug!(
                        percent,
                        original_bytes = data.len(),
                        compressed_bytes = bytes.len(),
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "Image compressed"
                    );
                    data = bytes;
                    mimetype = COMPRESSED_MIMETYPE.to_string();
                    name_options.overrides.extension = Some("jpg".to_string());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Image compression failed, storing original");
                }
            }
        }
    }

    let record = reserve_record(
        state,
        &name_options,
        &original_name,
        &mimetype,
        data.len() as u64,
    )
    .await?;

    if let Err(e) = state.storage.put(&record.name, data, Some(&mimetype)).await {
        discard_record(state, &record).await;
        return Err(e.into());
    }

    Ok(record)
}

async fn finalize_chunked(
    state: &AppState,
    options: &UploadOptions,
    upload: AssembledUpload,
) -> Result<FileRecord, AppError> {
    let record = match reserve_record(
        state,
        options,
        &upload.original_name,
        &upload.mimetype,
        upload.size,
    )
    .await
    {
        Ok(record) => record,
        Err(e) => {
            state.reassembler.release(&upload.identifier).await;
            return Err(e);
        }
    };

    if let Err(e) = state
        .reassembler
        .finalize(&upload.identifier, &record.name)
        .await
    {
        discard_record(state, &record).await;
        return Err(e);
    }

    Ok(record)
}

/// Create the metadata record under a fresh name.
///
/// The record claims the name before any bytes are written, so concurrent uploads
/// never share a storage key. Fixed names (`name` format or a filename override) fall
/// back to random names when already taken.
async fn reserve_record(
    state: &AppState,
    options: &UploadOptions,
    original_name: &str,
    mimetype: &str,
    size: u64,
) -> Result<FileRecord, AppError> {
    let password = match options.password.as_deref() {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    let now = Utc::now();
    let mut fallback = options.clone();
    fallback.format = FileNameFormat::Random;
    fallback.overrides.filename = None;

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            state.names.file_name(options, original_name, now)
        } else {
            state.names.file_name(&fallback, original_name, now)
        };

        let created = state
            .repository
            .create_file_record(NewFileRecord {
                name: name.clone(),
                original_name: options
                    .add_original_name
                    .then(|| original_name.to_string()),
                mimetype: mimetype.to_string(),
                size: i64::try_from(size).unwrap_or(i64::MAX),
                deletes_at: options.deletes_at,
                max_views: options.max_views,
                password: password.clone(),
                folder_id: options.folder.clone(),
            })
            .await;

        match created {
            Ok(record) => return Ok(record),
            Err(AppError::Conflict(_)) => {
                tracing::debug!(name = %name, attempt, "File name taken, generating another");
            }
            Err(e) => return Err(e),
        }
    }

    Err(AppError::Conflict(
        "Could not generate a unique file name".to_string(),
    ))
}

/// Drop a reserved record whose bytes never reached storage.
async fn discard_record(state: &AppState, record: &FileRecord) {
    if let Err(e) = state.repository.delete_file_record(record.id).await {
        tracing::warn!(file_id = %record.id, name = %record.name, error = %e, "Failed to remove orphaned record");
    }
}

fn file_url(state: &AppState, options: &UploadOptions, name: &str) -> String {
    let base = match options.overrides.return_domain.as_deref() {
        Some(domain) if domain.contains("://") => domain.to_string(),
        Some(domain) => format!("https://{}", domain),
        None => state.config.return_url().to_string(),
    };
    format!("{}/raw/{}", base.trim_end_matches('/'), name)
}

/// Filename from `Content-Disposition`, if the client sent one.
fn original_name(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.split(';')
                .map(str::trim)
                .find_map(|part| part.strip_prefix("filename="))
                .map(|name| name.trim_matches('"').to_string())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_ORIGINAL_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn content_disposition_filename() {
        let mut headers = HeaderMap::new();
        assert_eq!(original_name(&headers), "upload");

        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"holiday.png\""),
        );
        assert_eq!(original_name(&headers), "holiday.png");
    }

    #[test]
    fn partial_response_shape() {
        let json = serde_json::to_value(PartialUploadResponse {
            partial_success: true,
            partial_identifier: "abc".to_string(),
            received: 10,
            total: 20,
        })
        .unwrap();
        assert_eq!(json["partialSuccess"], true);
        assert_eq!(json["partialIdentifier"], "abc");
    }
}
