use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// How the stored name of an upload is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileNameFormat {
    #[default]
    Random,
    Uuid,
    Date,
    Name,
    Gfycat,
    RandomWords,
}

impl FileNameFormat {
    pub const ALL: [FileNameFormat; 6] = [
        FileNameFormat::Random,
        FileNameFormat::Uuid,
        FileNameFormat::Date,
        FileNameFormat::Name,
        FileNameFormat::Gfycat,
        FileNameFormat::RandomWords,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileNameFormat::Random => "random",
            FileNameFormat::Uuid => "uuid",
            FileNameFormat::Date => "date",
            FileNameFormat::Name => "name",
            FileNameFormat::Gfycat => "gfycat",
            FileNameFormat::RandomWords => "random-words",
        }
    }
}

impl FromStr for FileNameFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileNameFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid file name format: {}", s))
    }
}

impl Display for FileNameFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Per-upload overrides requested by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOverrides {
    pub filename: Option<String>,
    pub return_domain: Option<String>,
    /// Always starts with a `.` once parsed.
    pub extension: Option<String>,
}

/// One chunk of a resumable upload, as described by its request headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialDescriptor {
    pub filename: String,
    pub content_type: String,
    /// Session key shared by every chunk of the same logical upload.
    pub identifier: String,
    pub last_chunk: bool,
    /// `[start, end, total]`, `end` inclusive.
    pub range: [u64; 3],
    pub content_length: u64,
}

impl PartialDescriptor {
    pub fn start(&self) -> u64 {
        self.range[0]
    }

    pub fn end(&self) -> u64 {
        self.range[1]
    }

    pub fn total(&self) -> u64 {
        self.range[2]
    }

    /// Number of bytes covered by the declared range.
    pub fn declared_len(&self) -> u64 {
        self.end() - self.start() + 1
    }
}

/// Validated directive derived from upload request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    pub deletes_at: Option<DateTime<Utc>>,
    pub format: FileNameFormat,
    pub image_compression_percent: Option<u8>,
    pub password: Option<String>,
    pub max_views: Option<i64>,
    pub no_json: bool,
    pub add_original_name: bool,
    pub overrides: UploadOverrides,
    pub folder: Option<String>,
    pub partial: Option<PartialDescriptor>,
}
