//! Animation codec boundary.
//!
//! The sync core moves animation payloads as opaque bytes. Turning those bytes
//! into something the host can play back (and back again) is the job of an
//! [`AnimationCodec`]; handing the decoded result to the host is the job of an
//! [`AnimationSink`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from encoding or decoding an animation payload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Failed to encode animation: {0}")]
    Encode(String),

    #[error("Failed to decode animation: {0}")]
    Decode(String),

    #[error("Invalid animation: {0}")]
    Invalid(String),
}

/// Error reported by the host when it cannot take an imported animation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Converts between the host's animation representation and wire bytes.
pub trait AnimationCodec: Send + 'static {
    type Animation: Send + 'static;

    fn encode(&self, animation: &Self::Animation) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Animation, CodecError>;
}

/// Receives decoded animations for a given armature.
pub trait AnimationSink<A>: Send + 'static {
    fn apply(&mut self, armature: &str, animation: A) -> Result<(), SinkError>;
}

/// A single keyed pose of one bone.
///
/// Channels that were not keyed on this frame are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub frame: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<[f32; 3]>,
    /// Quaternion as `[w, x, y, z]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<[f32; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<[f32; 3]>,
}

/// Animation payload as it crosses the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animation {
    pub name: String,
    pub fps: f32,
    pub frame_start: i32,
    pub frame_end: i32,
    #[serde(default)]
    pub bones: BTreeMap<String, Vec<Keyframe>>,
}

impl Animation {
    pub fn new(name: impl Into<String>, fps: f32, frame_start: i32, frame_end: i32) -> Self {
        Self {
            name: name.into(),
            fps,
            frame_start,
            frame_end,
            bones: BTreeMap::new(),
        }
    }

    /// Number of frames covered, inclusive of both ends.
    pub fn frame_count(&self) -> u32 {
        let count = i64::from(self.frame_end) - i64::from(self.frame_start) + 1;
        count.clamp(0, i64::from(u32::MAX)) as u32
    }

    /// Total number of keyframes across all bones.
    pub fn keyframe_count(&self) -> usize {
        self.bones.values().map(Vec::len).sum()
    }

    fn validate(&self) -> Result<(), CodecError> {
        if self.fps.is_nan() || self.fps <= 0.0 {
            return Err(CodecError::Invalid(format!(
                "fps must be positive, got {}",
                self.fps
            )));
        }
        if self.frame_start > self.frame_end {
            return Err(CodecError::Invalid(format!(
                "frame_start {} is after frame_end {}",
                self.frame_start, self.frame_end
            )));
        }
        Ok(())
    }
}

/// JSON codec for [`Animation`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl AnimationCodec for JsonCodec {
    type Animation = Animation;

    fn encode(&self, animation: &Animation) -> Result<Vec<u8>, CodecError> {
        animation.validate()?;
        serde_json::to_vec(animation).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Animation, CodecError> {
        let animation: Animation =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        animation.validate()?;
        Ok(animation)
    }
}
