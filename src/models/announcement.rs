use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

use super::record::UpdateRecord;
use super::{deserialize_id, deserialize_nullable_string};

/// Errors raised while parsing an inbound announcement.
#[derive(Debug, Error)]
pub enum AnnouncementError {
    /// Payload is not valid JSON or has fields of the wrong type
    #[error("Malformed announcement: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is valid JSON but not an object
    #[error("Announcement is not a JSON object")]
    NotAnObject,

    /// The announcement has no usable id
    #[error("Announcement has no id")]
    MissingId,

    /// The announcement has no download URL
    #[error("Announcement '{0}' has no download URL")]
    MissingUrl(String),
}

/// Update announcement received on the control channel.
///
/// Keys are matched case-insensitively: they are folded to lowercase
/// before deserialization, hence the lowercase renames below.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Announcement {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "mpakdownloadurl", default, deserialize_with = "deserialize_nullable_string")]
    pub download_url: String,
    #[serde(rename = "targetdevices", default)]
    pub target_devices: Vec<String>,
    #[serde(rename = "publishedon", default, deserialize_with = "deserialize_published_on")]
    pub published_on: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_nullable_string")]
    pub version: String,
    #[serde(rename = "downloadsize", default)]
    pub download_size: Option<u64>,
    #[serde(rename = "downloadhash", default, deserialize_with = "deserialize_nullable_string")]
    pub download_hash: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl Announcement {
    /// Parse a control-channel payload.
    pub fn parse(payload: &str) -> Result<Self, AnnouncementError> {
        let value: Value = serde_json::from_str(payload)?;
        let object = match value {
            Value::Object(map) => fold_keys(map),
            _ => return Err(AnnouncementError::NotAnObject),
        };
        if !object.contains_key("id") {
            return Err(AnnouncementError::MissingId);
        }

        let announcement: Announcement = serde_json::from_value(Value::Object(object))?;
        if announcement.id.trim().is_empty() {
            return Err(AnnouncementError::MissingId);
        }
        if announcement.download_url.trim().is_empty() {
            return Err(AnnouncementError::MissingUrl(announcement.id));
        }
        Ok(announcement)
    }

    /// Convert into a fresh store record (flags cleared).
    ///
    /// A missing publish time is taken as the time of receipt.
    pub fn into_record(self) -> UpdateRecord {
        let mut record = UpdateRecord::new(
            self.id,
            self.version,
            self.download_url,
            self.published_on.unwrap_or_else(Utc::now),
        )
        .with_size(self.download_size.unwrap_or(0))
        .with_hash(self.download_hash);
        record.summary = self.summary;
        record.detail = self.detail;
        record
    }
}

/// Publish time as RFC 3339, or a bare date-time taken as UTC.
///
/// Anything else counts as missing rather than failing the announcement.
fn deserialize_published_on<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(raw)) => raw,
        _ => return Ok(None),
    };
    let raw = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok());
    Ok(naive.map(|naive| naive.and_utc()))
}

/// Lowercase every top-level key. On a case-only collision the later key wins.
fn fold_keys(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| (key.to_ascii_lowercase(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "id": "upd-42",
        "mpakDownloadUrl": "https://updates.example.com/upd-42.mpak",
        "targetDevices": ["dev-1", "dev-2"],
        "publishedOn": "2024-06-01T08:30:00Z",
        "version": "2.1.0",
        "downloadSize": 1048576,
        "downloadHash": "9F86D081884C7D659A2FEAA0C55AD015A3BF4F1B2B0B822CD15D6C15B0F00A08",
        "summary": "Security fixes",
        "detail": null
    }"#;

    #[test]
    fn test_parse_full_announcement() {
        let ann = Announcement::parse(FULL).unwrap();
        assert_eq!(ann.id, "upd-42");
        assert_eq!(ann.download_url, "https://updates.example.com/upd-42.mpak");
        assert_eq!(ann.target_devices, vec!["dev-1", "dev-2"]);
        assert_eq!(ann.version, "2.1.0");
        assert_eq!(ann.download_size, Some(1048576));
        assert_eq!(ann.summary.as_deref(), Some("Security fixes"));
        assert!(ann.detail.is_none());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let payload = r#"{
            "ID": "upd-7",
            "MPAKDOWNLOADURL": "https://updates.example.com/7",
            "PublishedOn": "2024-06-01T08:30:00Z",
            "Version": "1.0.1",
            "downloadsize": 10,
            "DownloadHash": "abc"
        }"#;
        let ann = Announcement::parse(payload).unwrap();
        assert_eq!(ann.id, "upd-7");
        assert_eq!(ann.download_url, "https://updates.example.com/7");
        assert_eq!(ann.version, "1.0.1");
        assert_eq!(ann.download_size, Some(10));
        assert_eq!(ann.download_hash, "abc");
    }

    #[test]
    fn test_parse_numeric_id() {
        let payload = r#"{"id": 1234, "mpakDownloadUrl": "http://x/1234"}"#;
        let ann = Announcement::parse(payload).unwrap();
        assert_eq!(ann.id, "1234");
        assert!(ann.published_on.is_none());
    }

    #[test]
    fn test_parse_lenient_publish_time() {
        use chrono::TimeZone;

        let parse = |published: &str| {
            let payload = format!(
                r#"{{"id": "u1", "mpakDownloadUrl": "http://x/u1", "publishedOn": {}}}"#,
                published
            );
            Announcement::parse(&payload).unwrap().published_on
        };
        let expected = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();

        assert_eq!(parse(r#""2024-06-01T08:30:00""#), Some(expected));
        assert_eq!(parse(r#""2024-06-01 08:30:00""#), Some(expected));
        assert_eq!(parse(r#""2024-06-01T10:30:00+02:00""#), Some(expected));
        assert_eq!(parse(r#""last tuesday""#), None);
        assert_eq!(parse("1717230600"), None);
        assert_eq!(parse("null"), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Announcement::parse("not json"),
            Err(AnnouncementError::Json(_))
        ));
        assert!(matches!(
            Announcement::parse("[1, 2]"),
            Err(AnnouncementError::NotAnObject)
        ));
        assert!(matches!(
            Announcement::parse(r#"{"version": "1"}"#),
            Err(AnnouncementError::MissingId)
        ));
        assert!(matches!(
            Announcement::parse(r#"{"id": "  ", "mpakDownloadUrl": "http://x"}"#),
            Err(AnnouncementError::MissingId)
        ));
        assert!(matches!(
            Announcement::parse(r#"{"id": "u1"}"#),
            Err(AnnouncementError::MissingUrl(_))
        ));
    }

    #[test]
    fn test_into_record_clears_flags() {
        let record = Announcement::parse(FULL).unwrap().into_record();
        assert_eq!(record.id, "upd-42");
        assert_eq!(record.download_size, 1048576);
        assert!(record.has_hash());
        assert!(!record.retrieved);
        assert!(!record.applied);
        assert_eq!(record.summary.as_deref(), Some("Security fixes"));
    }
}
