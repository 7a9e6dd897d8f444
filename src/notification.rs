//! The Docker Hub push webhook payload.
//!
//! Only `repository.repo_name` drives reconciliation; everything else is carried along
//! for logging and the optional registry callback.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::fmt;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub callback_url: String,
    /// Opaque `push_data` object (tag, images, ...) as sent by the registry
    #[serde(default)]
    pub push_data: serde_json::Value,
    #[serde(default)]
    pub pushed_at: f64,
    #[serde(default)]
    pub pusher: String,
    pub repository: Repository,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Repository {
    #[serde(deserialize_with = "string_or_number")]
    pub comment_count: String,
    pub date_created: f64,
    pub description: String,
    pub dockerfile: String,
    pub full_description: String,
    pub is_official: bool,
    pub is_private: bool,
    pub is_trusted: bool,
    pub name: String,
    pub namespace: String,
    pub owner: String,
    /// Fully qualified repository name, compared verbatim against container images
    pub repo_name: String,
    pub repo_url: String,
    pub star_count: u64,
    pub status: String,
}

impl Notification {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).context("Failed to decode webhook payload")
    }

    pub fn image_reference(&self) -> &str {
        &self.repository.repo_name
    }

    pub fn pushed_at(&self) -> Option<DateTime<Utc>> {
        epoch_to_datetime(self.pushed_at)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image {} pushed by {}", self.image_reference(), self.pusher)?;
        if let Some(pushed_at) = self.pushed_at() {
            write!(f, " at {}", pushed_at.to_rfc3339())?;
        }
        Ok(())
    }
}

fn epoch_to_datetime(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() || epoch <= 0.0 {
        return None;
    }
    let secs = epoch.trunc() as i64;
    let nanos = (epoch.fract() * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos)
}

// Docker Hub sends comment_count as a number, older hooks and hand-written payloads as a string
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(serde_json::Number),
        Null,
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
        StringOrNumber::Null => String::new(),
    })
}
