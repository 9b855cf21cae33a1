//! Upload directive parsing.
//!
//! Converts the `x-skycloud-*` request headers into a validated [`UploadOptions`].
//! The first invalid header aborts parsing and is reported as a [`HeaderError`]
//! naming the offending header. Empty header values are treated as absent.

use chrono::{DateTime, Utc};
use http::HeaderMap;
use rand::seq::IndexedRandom;
use skycloud_core::duration::parse_expiry;
use skycloud_core::models::{FileNameFormat, PartialDescriptor, UploadOptions, UploadOverrides};
use skycloud_core::{AppError, FilesConfig};

pub const DELETES_AT: &str = "x-skycloud-deletes-at";
pub const FORMAT: &str = "x-skycloud-format";
pub const IMAGE_COMPRESSION_PERCENT: &str = "x-skycloud-image-compression-percent";
pub const PASSWORD: &str = "x-skycloud-password";
pub const MAX_VIEWS: &str = "x-skycloud-max-views";
pub const NO_JSON: &str = "x-skycloud-no-json";
pub const ORIGINAL_NAME: &str = "x-skycloud-original-name";
pub const FOLDER: &str = "x-skycloud-folder";
pub const FILENAME: &str = "x-skycloud-filename";
pub const DOMAIN: &str = "x-skycloud-domain";
pub const FILE_EXTENSION: &str = "x-skycloud-file-extension";
pub const CONTENT_RANGE: &str = "content-range";
pub const PARTIAL_FILENAME: &str = "x-skycloud-p-filename";
pub const PARTIAL_CONTENT_TYPE: &str = "x-skycloud-p-content-type";
pub const PARTIAL_IDENTIFIER: &str = "x-skycloud-p-identifier";
pub const PARTIAL_LAST_CHUNK: &str = "x-skycloud-p-lastchunk";
pub const PARTIAL_CONTENT_LENGTH: &str = "x-skycloud-p-content-length";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A rejected upload header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{header}: {message}")]
pub struct HeaderError {
    pub header: &'static str,
    pub message: String,
}

impl HeaderError {
    fn new(header: &'static str, message: impl Into<String>) -> Self {
        Self {
            header,
            message: message.into(),
        }
    }
}

impl From<HeaderError> for AppError {
    fn from(err: HeaderError) -> Self {
        AppError::validation(err.header, err.message)
    }
}

/// Parse upload headers relative to the current time.
pub fn parse_upload_headers(
    headers: &HeaderMap,
    files: &FilesConfig,
) -> Result<UploadOptions, HeaderError> {
    parse_upload_headers_at(headers, files, Utc::now())
}

/// Parse upload headers relative to `now`.
pub fn parse_upload_headers_at(
    headers: &HeaderMap,
    files: &FilesConfig,
    now: DateTime<Utc>,
) -> Result<UploadOptions, HeaderError> {
    let mut options = UploadOptions::default();

    options.deletes_at = match header(headers, DELETES_AT)? {
        Some(value) => Some(
            parse_expiry(value, now)
                .ok_or_else(|| HeaderError::new(DELETES_AT, "Invalid expiry date"))?,
        ),
        None => files
            .default_expiration
            .and_then(|expiration| now.checked_add_signed(expiration)),
    };

    options.format = match header(headers, FORMAT)? {
        Some(value) => value
            .parse::<FileNameFormat>()
            .map_err(|_| HeaderError::new(FORMAT, "Invalid format"))?,
        None => files.default_format,
    };

    if let Some(value) = header(headers, IMAGE_COMPRESSION_PERCENT)? {
        options.image_compression_percent = Some(parse_compression_percent(value)?);
    }

    options.password = header(headers, PASSWORD)?.map(str::to_string);

    if let Some(value) = header(headers, MAX_VIEWS)? {
        options.max_views = Some(parse_max_views(value)?);
    }

    options.no_json = header(headers, NO_JSON)? == Some("true");
    options.add_original_name = header(headers, ORIGINAL_NAME)? == Some("true");
    options.folder = header(headers, FOLDER)?.map(str::to_string);

    options.overrides = UploadOverrides {
        filename: header(headers, FILENAME)?.map(str::to_string),
        extension: header(headers, FILE_EXTENSION)?.map(normalize_extension),
        return_domain: header(headers, DOMAIN)?.and_then(pick_domain),
    };

    if let Some(value) = header(headers, CONTENT_RANGE)? {
        options.partial = Some(parse_partial(headers, value)?);
    }

    Ok(options)
}

/// Non-empty header value, or `None` when missing or blank.
fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, HeaderError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| HeaderError::new(name, "Invalid header encoding"))?;
    Ok((!value.trim().is_empty()).then_some(value))
}

fn parse_compression_percent(value: &str) -> Result<u8, HeaderError> {
    let num: f64 = value
        .trim()
        .parse()
        .ok()
        .filter(|n: &f64| n.is_finite())
        .ok_or_else(|| {
            HeaderError::new(
                IMAGE_COMPRESSION_PERCENT,
                "Invalid compression percent (NaN)",
            )
        })?;

    if !(0.0..=100.0).contains(&num) {
        return Err(HeaderError::new(
            IMAGE_COMPRESSION_PERCENT,
            "Invalid compression percent (must be between 0 and 100)",
        ));
    }
    if num.fract() != 0.0 {
        return Err(HeaderError::new(
            IMAGE_COMPRESSION_PERCENT,
            "Invalid compression percent (must be an integer)",
        ));
    }

    Ok(num as u8)
}

fn parse_max_views(value: &str) -> Result<i64, HeaderError> {
    let num: i64 = value
        .trim()
        .parse()
        .map_err(|_| HeaderError::new(MAX_VIEWS, "Invalid max views (NaN)"))?;

    if num < 0 {
        return Err(HeaderError::new(
            MAX_VIEWS,
            "Invalid max views (must be greater than or equal to 0)",
        ));
    }

    Ok(num)
}

fn normalize_extension(value: &str) -> String {
    let value = value.trim();
    if value.starts_with('.') {
        value.to_string()
    } else {
        format!(".{}", value)
    }
}

/// Pick one of the comma separated domains uniformly at random.
fn pick_domain(value: &str) -> Option<String> {
    let candidates: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|domain| !domain.is_empty())
        .collect();

    candidates
        .choose(&mut rand::rng())
        .map(|domain| domain.to_string())
}

/// Parse `bytes <start>-<end>/<total>`.
fn parse_content_range(value: &str) -> Option<[u64; 3]> {
    let rest = value.trim().strip_prefix("bytes ")?;
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;

    Some([
        start.trim().parse().ok()?,
        end.trim().parse().ok()?,
        total.trim().parse().ok()?,
    ])
}

fn parse_partial(headers: &HeaderMap, content_range: &str) -> Result<PartialDescriptor, HeaderError> {
    let range = parse_content_range(content_range)
        .ok_or_else(|| HeaderError::new(CONTENT_RANGE, "Invalid content-range"))?;

    let [start, end, total] = range;
    if start > end || end >= total {
        return Err(HeaderError::new(
            CONTENT_RANGE,
            "Invalid content-range (expected start <= end < total)",
        ));
    }

    let identifier = header(headers, PARTIAL_IDENTIFIER)?
        .ok_or_else(|| HeaderError::new(PARTIAL_IDENTIFIER, "Missing partial identifier"))?;

    let filename = header(headers, PARTIAL_FILENAME)?
        .ok_or_else(|| HeaderError::new(PARTIAL_FILENAME, "Missing partial filename"))?;

    let content_type = header(headers, PARTIAL_CONTENT_TYPE)?.unwrap_or(DEFAULT_CONTENT_TYPE);

    let content_length = match header(headers, PARTIAL_CONTENT_LENGTH)? {
        Some(value) => value.trim().parse::<u64>().map_err(|_| {
            HeaderError::new(PARTIAL_CONTENT_LENGTH, "Invalid content length (NaN)")
        })?,
        None => end - start + 1,
    };

    Ok(PartialDescriptor {
        filename: filename.to_string(),
        content_type: content_type.to_string(),
        identifier: identifier.to_string(),
        last_chunk: header(headers, PARTIAL_LAST_CHUNK)? == Some("true"),
        range,
        content_length,
    })
}
