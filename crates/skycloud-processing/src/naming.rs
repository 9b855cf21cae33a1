//! Storage key generation for uploaded files.

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::seq::IndexedRandom;
use rand::Rng;
use skycloud_core::models::{FileNameFormat, UploadOptions};
use skycloud_core::FilesConfig;
use std::fmt::Write;
use std::path::Path;
use uuid::Uuid;

const FALLBACK_DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const ADJECTIVES: &[&str] = &[
    "able", "brave", "bright", "calm", "clever", "cosmic", "crisp", "dapper", "eager", "fancy",
    "gentle", "giant", "happy", "humble", "jolly", "keen", "lively", "lucky", "mellow", "misty",
    "nimble", "proud", "quick", "quiet", "rapid", "shiny", "silent", "sleepy", "smooth", "sunny",
    "swift", "tidy", "vivid", "warm", "wild", "witty",
];

const ANIMALS: &[&str] = &[
    "badger", "beaver", "bison", "cobra", "crane", "dingo", "eagle", "ferret", "finch", "gecko",
    "heron", "ibis", "jackal", "koala", "lemur", "lynx", "marten", "moose", "newt", "ocelot",
    "otter", "panda", "puffin", "quail", "raven", "salmon", "stoat", "tapir", "toucan", "walrus",
    "weasel", "yak", "zebra",
];

const WORDS: &[&str] = &[
    "anchor", "apple", "arrow", "basket", "beacon", "breeze", "candle", "canyon", "castle",
    "cloud", "comet", "copper", "desert", "ember", "feather", "forest", "garden", "glacier",
    "harbor", "island", "lantern", "meadow", "mirror", "nebula", "ocean", "orbit", "pebble",
    "planet", "river", "rocket", "shadow", "signal", "summit", "thunder", "valley", "willow",
];

/// Key of the thumbnail generated for a file.
pub fn thumbnail_key(id: Uuid) -> String {
    format!(".thumbnail.{}.jpg", id)
}

/// Produces storage names according to a [`FileNameFormat`].
#[derive(Debug, Clone)]
pub struct NameGenerator {
    length: usize,
    date_format: String,
}

impl NameGenerator {
    pub fn new(files: &FilesConfig) -> Self {
        Self {
            length: files.length.max(1),
            date_format: files.default_date_format.clone(),
        }
    }

    /// Full storage name: base name plus extension.
    ///
    /// An explicit filename override replaces the generated base. The extension comes
    /// from the extension override, then the original file name.
    pub fn file_name(&self, options: &UploadOptions, original_name: &str, now: DateTime<Utc>) -> String {
        let base = match options.overrides.filename.as_deref() {
            Some(name) if !name.trim().is_empty() => sanitize(strip_extension(name)),
            _ => self.base_name(options.format, original_name, now),
        };

        let extension = options
            .overrides
            .extension
            .as_deref()
            .map(|ext| ext.trim_start_matches('.').to_string())
            .filter(|ext| !ext.is_empty())
            .or_else(|| extension_of(original_name));

        match extension {
            Some(ext) => format!("{}.{}", base, sanitize(&ext)),
            None => base,
        }
    }

    /// Name without extension.
    pub fn base_name(&self, format: FileNameFormat, original_name: &str, now: DateTime<Utc>) -> String {
        let mut rng = rand::rng();
        match format {
            FileNameFormat::Random => (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(self.length)
                .map(char::from)
                .collect(),
            FileNameFormat::Uuid => Uuid::new_v4().to_string(),
            FileNameFormat::Date => self.format_date(now),
            FileNameFormat::Name => {
                let stem = sanitize(strip_extension(original_name));
                if stem.is_empty() {
                    self.base_name(FileNameFormat::Random, original_name, now)
                } else {
                    stem
                }
            }
            FileNameFormat::Gfycat => {
                let mut name = String::new();
                for list in [ADJECTIVES, ADJECTIVES, ANIMALS] {
                    if let Some(word) = list.choose(&mut rng) {
                        name.push_str(&capitalize(word));
                    }
                }
                name
            }
            FileNameFormat::RandomWords => {
                let words: Vec<&str> = (0..3).filter_map(|_| WORDS.choose(&mut rng).copied()).collect();
                words.join("-")
            }
        }
    }

    fn format_date(&self, now: DateTime<Utc>) -> String {
        let mut out = String::new();
        if write!(out, "{}", now.format(&self.date_format)).is_ok() {
            return sanitize(&out);
        }

        tracing::warn!(
            format = %self.date_format,
            "Invalid date format for file names, using default"
        );
        now.format(FALLBACK_DATE_FORMAT).to_string()
    }
}

fn strip_extension(name: &str) -> &str {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file.rfind('.') {
        Some(idx) if idx > 0 => &file[..idx],
        _ => file,
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Keep names safe as storage keys and URL path segments.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn generator() -> NameGenerator {
        NameGenerator::new(&FilesConfig::default())
    }

    fn options(format: FileNameFormat) -> UploadOptions {
        UploadOptions {
            format,
            ..Default::default()
        }
    }

    #[test]
    fn random_names_use_configured_length() {
        let files = FilesConfig {
            length: 10,
            ..Default::default()
        };
        let name = NameGenerator::new(&files).file_name(&options(FileNameFormat::Random), "cat.PNG", Utc::now());
        let (base, ext) = name.split_once('.').unwrap();
        assert_eq!(base.len(), 10);
        assert!(base.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(ext, "png");
    }

    #[test]
    fn uuid_names_parse() {
        let name = generator().base_name(FileNameFormat::Uuid, "a.txt", Utc::now());
        assert!(Uuid::parse_str(&name).is_ok());
    }

    #[test]
    fn date_names_follow_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let name = generator().base_name(FileNameFormat::Date, "a.txt", now);
        assert_eq!(name, "2024-03-09_14-05-07");
    }

    #[test]
    fn name_format_keeps_sanitized_original() {
        let name = generator().file_name(&options(FileNameFormat::Name), "my holiday photo.jpg", Utc::now());
        assert_eq!(name, "my_holiday_photo.jpg");

        let name = generator().file_name(&options(FileNameFormat::Name), "../../etc/passwd", Utc::now());
        assert_eq!(name, "passwd");
    }

    #[test]
    fn word_formats() {
        let gfy = generator().base_name(FileNameFormat::Gfycat, "", Utc::now());
        assert!(gfy.chars().next().unwrap().is_ascii_uppercase());
        assert_eq!(gfy.chars().filter(|c| c.is_ascii_uppercase()).count(), 3);

        let words = generator().base_name(FileNameFormat::RandomWords, "", Utc::now());
        assert_eq!(words.split('-').count(), 3);
    }

    #[test]
    fn overrides_take_precedence() {
        let mut opts = options(FileNameFormat::Uuid);
        opts.overrides.filename = Some("report.final.pdf".to_string());
        opts.overrides.extension = Some(".txt".to_string());
        assert_eq!(generator().file_name(&opts, "x.pdf", Utc::now()), "report.final.txt");
    }

    #[test]
    fn files_without_extension() {
        let name = generator().file_name(&options(FileNameFormat::Name), "Makefile", Utc::now());
        assert_eq!(name, "Makefile");
    }

    #[test]
    fn thumbnail_keys_are_hidden_jpegs() {
        let id = Uuid::nil();
        assert_eq!(
            thumbnail_key(id),
            ".thumbnail.00000000-0000-0000-0000-000000000000.jpg"
        );
    }
}
