use crate::model::{DisposalRecord, UserProfile};
use crate::progression::Progression;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL log of one session's activity
pub struct Journal {
    pub path: PathBuf,
    session_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    session_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl Journal {
    pub fn new(path: &Path, session_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            session_id: session_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            session_id: &self.session_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn signed_in(&mut self, profile: &UserProfile, created: bool) -> Result<()> {
        self.log(
            "signed_in",
            serde_json::json!({
                "user_id": profile.id,
                "level": profile.level,
                "exp": profile.exp,
                "created": created,
            }),
        )
    }

    pub fn region_resolved(&mut self, region: &str, fallback: Option<&str>) -> Result<()> {
        self.log(
            "region_resolved",
            serde_json::json!({ "region": region, "fallback_cause": fallback }),
        )
    }

    pub fn item_scanned(&mut self, category: &str, sub_category: &str) -> Result<()> {
        self.log(
            "item_scanned",
            serde_json::json!({ "category": category, "sub_category": sub_category }),
        )
    }

    pub fn proof_rejected(&mut self, reason: &str, digest: &str) -> Result<()> {
        self.log(
            "proof_rejected",
            serde_json::json!({ "reason": reason, "image_sha256": digest }),
        )
    }

    pub fn proof_duplicate(&mut self, digest: &str) -> Result<()> {
        self.log(
            "proof_duplicate",
            serde_json::json!({ "image_sha256": digest }),
        )
    }

    /// Log an accepted disposal with its level change and evictions
    pub fn disposal_recorded(&mut self, progression: &Progression, digest: &str) -> Result<()> {
        let evicted: Vec<String> = progression
            .history
            .evict
            .iter()
            .map(|r: &DisposalRecord| r.id.to_string())
            .collect();
        self.log(
            "disposal_recorded",
            serde_json::json!({
                "record_id": progression.history.insert.id.to_string(),
                "category": progression.history.insert.category.as_str(),
                "sub_category": progression.history.insert.sub_category,
                "xp_gained": progression.xp_gained,
                "level": progression.profile.level,
                "exp": progression.profile.exp,
                "leveled_up": progression.leveled_up,
                "evicted": evicted,
                "image_sha256": digest,
            }),
        )
    }

    pub fn error(&mut self, operation: &str, message: &str, recoverable: bool) -> Result<()> {
        self.log(
            "error",
            serde_json::json!({
                "operation": operation,
                "message": message,
                "recoverable": recoverable,
            }),
        )
    }

    pub fn signed_out(&mut self, user_id: &str) -> Result<()> {
        self.log("signed_out", serde_json::json!({ "user_id": user_id }))
    }
}
