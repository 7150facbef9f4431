//! Wire types and request paths for the counterpart server.
//!
//! All armature names travel percent-encoded, both in path segments and in
//! query strings. Field names that cross the wire in camelCase are renamed
//! explicitly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

pub const LIST_ARMATURES_PATH: &str = "/list_armatures";
pub const EXPORT_ANIMATION_PATH: &str = "/export_animation";
pub const IMPORT_ANIMATION_PATH: &str = "/import_animation";
pub const ANIMATION_STATUS_PATH: &str = "/animation_status";
pub const BONE_REST_PATH: &str = "/get_bone_rest";

/// Response of `GET /list_armatures`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmatureList {
    pub armatures: Vec<String>,
}

/// Response of `GET /animation_status`.
///
/// Servers may attach extra fields; they are kept in `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationStatus {
    #[serde(rename = "hasChanged")]
    pub has_changed: bool,
    pub hash: Fingerprint,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AnimationStatus {
    pub fn new(has_changed: bool, hash: impl Into<Fingerprint>) -> Self {
        Self {
            has_changed,
            hash: hash.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Response of `POST /import_animation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportAck {
    pub success: bool,
}

/// Error body returned by the server on non-success statuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Bone name to rest pose, as produced by the counterpart.
///
/// Rest pose data is opaque to the sync core.
pub type BoneRest = BTreeMap<String, serde_json::Value>;

/// `/export_animation/{armature}`
pub fn export_animation_path(armature: &str) -> String {
    format!("{}/{}", EXPORT_ANIMATION_PATH, urlencoding::encode(armature))
}

/// `/import_animation` with an optional `armature` query parameter.
pub fn import_animation_path(target: Option<&str>) -> String {
    match target {
        Some(armature) => format!(
            "{}?armature={}",
            IMPORT_ANIMATION_PATH,
            urlencoding::encode(armature)
        ),
        None => IMPORT_ANIMATION_PATH.to_string(),
    }
}

/// `/animation_status?armature={name}&last_known_hash={hash}`
///
/// An unknown hash is sent as an empty value.
pub fn animation_status_path(armature: &str, last_known: Option<&Fingerprint>) -> String {
    let hash = last_known.map(Fingerprint::as_str).unwrap_or("");
    format!(
        "{}?armature={}&last_known_hash={}",
        ANIMATION_STATUS_PATH,
        urlencoding::encode(armature),
        urlencoding::encode(hash)
    )
}

/// `/get_bone_rest/{armature}`
pub fn bone_rest_path(armature: &str) -> String {
    format!("{}/{}", BONE_REST_PATH, urlencoding::encode(armature))
}

/// Picks the most useful message out of an error response.
///
/// Prefers the JSON `message` field, then `error`, then the raw body text.
/// Returns `None` when the body carries nothing readable.
pub fn server_message(body: &[u8]) -> Option<String> {
    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        if let Some(message) = parsed.message.or(parsed.error) {
            if !message.trim().is_empty() {
                return Some(message);
            }
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() || text.starts_with('{') {
        None
    } else {
        Some(text.to_string())
    }
}
