use crate::error::{Error, Result, Service};
use crate::model::{WasteCategory, IRRELEVANT_SUB_CATEGORY};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Photo submitted for classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    bytes: Vec<u8>,
}

impl Image {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("image is empty".to_string()));
        }
        Ok(Self { bytes })
    }

    /// Load a photo from disk. Files holding a `data:image/...;base64,` URI
    /// (as exported by a browser canvas) are decoded.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            Error::InvalidInput(format!("cannot read {}: {}", path.display(), e))
        })?;
        if bytes.starts_with(b"data:") {
            let text = String::from_utf8_lossy(&bytes);
            return Self::from_data_uri(text.trim());
        }
        Self::from_bytes(bytes)
    }

    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let decoded = STANDARD
            .decode(strip_data_uri(uri))
            .map_err(|e| Error::InvalidInput(format!("invalid base64 image: {}", e)))?;
        Self::from_bytes(decoded)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Hex SHA-256 of the image bytes
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Drop a `data:<mime>;base64,` prefix if present
pub fn strip_data_uri(s: &str) -> &str {
    match s.rfind("base64,") {
        Some(idx) => &s[idx + "base64,".len()..],
        None => s,
    }
}

#[derive(Debug, Serialize)]
pub struct ImageRequest<'a> {
    pub access_token: &'a str,
    pub image_base64: String,
}

/// What an item photo shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: WasteCategory,
    pub sub_category: String,
}

impl Classification {
    /// False when the classifier saw no trash in the photo
    pub fn is_trash(&self) -> bool {
        self.sub_category != IRRELEVANT_SUB_CATEGORY
    }

    pub fn guidance(&self) -> &'static str {
        if self.is_trash() {
            self.category.guidance()
        } else {
            "No trash detected in this photo"
        }
    }
}

/// Judgement on a disposal proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub reason: String,
    /// May be missing on rejected proofs
    pub category: Option<WasteCategory>,
    pub sub_category: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawReply {
    #[serde(default)]
    passed: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    sub_category: String,
}

/// Parse a classifier reply, tolerating prose around the JSON object and
/// single-quoted strings.
pub fn parse_reply(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::decode(Service::Classifier, "empty reply"));
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let object = JSON_OBJECT
        .find(trimmed)
        .ok_or_else(|| Error::decode(Service::Classifier, format!("no JSON object in {:?}", raw)))?
        .as_str();
    serde_json::from_str(object)
        .or_else(|_| serde_json::from_str(&requote(object)))
        .map_err(|e| Error::decode(Service::Classifier, e))
}

/// Replace unescaped single quotes with double quotes
fn requote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for c in s.chars() {
        if c == '\'' && !escaped {
            out.push('"');
        } else {
            out.push(c);
        }
        escaped = c == '\\' && !escaped;
    }
    out
}

fn raw_reply(value: Value) -> Result<RawReply> {
    serde_json::from_value(value).map_err(|e| Error::decode(Service::Classifier, e))
}

fn category(raw: &str) -> Result<WasteCategory> {
    WasteCategory::parse(raw)
        .ok_or_else(|| Error::decode(Service::Classifier, format!("unknown category {:?}", raw)))
}

pub fn classification_from(value: Value) -> Result<Classification> {
    let raw = raw_reply(value)?;
    Ok(Classification {
        category: category(&raw.category)?,
        sub_category: raw.sub_category.trim().to_lowercase(),
    })
}

pub fn verdict_from(value: Value) -> Result<Verdict> {
    let raw = raw_reply(value)?;
    let category = if raw.passed || !raw.category.trim().is_empty() {
        Some(category(&raw.category)?)
    } else {
        None
    };
    Ok(Verdict {
        passed: raw.passed,
        reason: raw.reason.trim().to_string(),
        category,
        sub_category: raw.sub_category.trim().to_lowercase(),
    })
}

/// Trait for classifier clients to allow mocking
pub trait Classifier: Send + Sync {
    fn classify_item(&self, access_token: &str, image: &Image) -> Result<Classification>;

    fn verify_disposal(&self, access_token: &str, image: &Image) -> Result<Verdict>;
}

pub struct HttpClassifier {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpClassifier {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn post(&self, path: &str, access_token: &str, image: &Image) -> Result<Value> {
        let url = format!("{}/trash/{}", self.base_url, path);
        debug!(url = %url, bytes = image.len(), "posting image to classifier");
        let request = ImageRequest {
            access_token,
            image_base64: image.to_base64(),
        };

        let resp = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(&request)
            .map_err(|e| Error::from_http(Service::Classifier, e))?;
        let body = resp
            .into_string()
            .map_err(|e| Error::decode(Service::Classifier, e))?;
        parse_reply(&body)
    }
}

impl Classifier for HttpClassifier {
    fn classify_item(&self, access_token: &str, image: &Image) -> Result<Classification> {
        classification_from(self.post("scan_trash", access_token, image)?)
    }

    fn verify_disposal(&self, access_token: &str, image: &Image) -> Result<Verdict> {
        verdict_from(self.post("prove_disposal", access_token, image)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_strip_data_uri() {
        assert_eq!(strip_data_uri("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_uri("AAAA"), "AAAA");
    }

    #[test]
    fn test_image_from_data_uri() {
        let image = Image::from_data_uri("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(image.len(), 8);
        assert_eq!(image.to_base64(), "iVBORw0KGgo=");
    }

    #[test]
    fn test_image_rejects_empty_and_garbage() {
        assert!(Image::from_bytes(Vec::new()).is_err());
        assert!(Image::from_data_uri("data:image/png;base64,!!!").is_err());
    }

    #[test]
    fn test_image_load_both_forms() {
        let dir = tempfile::tempdir().unwrap();

        let raw = dir.path().join("bin.png");
        std::fs::write(&raw, b"\x89PNG\r\n\x1a\n").unwrap();
        let a = Image::load(&raw).unwrap();

        let uri = dir.path().join("bin.txt");
        let mut f = std::fs::File::create(&uri).unwrap();
        writeln!(f, "data:image/png;base64,iVBORw0KGgo=").unwrap();
        let b = Image::load(&uri).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_parse_reply_strict() {
        let v = parse_reply(r#"{"category":"recyclable","sub_category":"glass"}"#).unwrap();
        assert_eq!(v["sub_category"], "glass");
    }

    #[test]
    fn test_parse_reply_with_prose_and_single_quotes() {
        let raw = "Sure! Here you go:\n{'category': 'Recyclable', 'sub_category': 'Plastics'}\nThanks";
        let c = classification_from(parse_reply(raw).unwrap()).unwrap();
        assert_eq!(c.category, WasteCategory::Recyclable);
        assert_eq!(c.sub_category, "plastics");
    }

    #[test]
    fn test_parse_reply_rejects_empty_and_prose() {
        assert!(parse_reply("   ").is_err());
        assert!(parse_reply("I cannot see any trash").is_err());
    }

    #[test]
    fn test_verdict_normalized() {
        let v = verdict_from(json!({
            "passed": true,
            "reason": "  Bottle going into bin ",
            "category": "Recyclable",
            "sub_category": "Plastics"
        }))
        .unwrap();
        assert!(v.passed);
        assert_eq!(v.reason, "Bottle going into bin");
        assert_eq!(v.category, Some(WasteCategory::Recyclable));
        assert_eq!(v.sub_category, "plastics");
    }

    #[test]
    fn test_rejected_verdict_without_category() {
        let v = verdict_from(json!({"passed": false, "reason": "No clear disposal action"})).unwrap();
        assert!(!v.passed);
        assert_eq!(v.category, None);
    }

    #[test]
    fn test_passed_verdict_requires_category() {
        let err = verdict_from(json!({"passed": true, "reason": "ok"})).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_irrelevant_classification() {
        let c = classification_from(json!({"category": "non-recyclable", "sub_category": "none"}))
            .unwrap();
        assert!(!c.is_trash());
        assert_eq!(c.guidance(), "No trash detected in this photo");
    }

    #[test]
    fn test_request_shape() {
        let image = Image::from_bytes(vec![1, 2, 3]).unwrap();
        let body = serde_json::to_value(ImageRequest {
            access_token: "jwt",
            image_base64: image.to_base64(),
        })
        .unwrap();
        assert_eq!(body, json!({"access_token": "jwt", "image_base64": "AQID"}));
    }
}
