//! Transport layer for the counterpart server.
//!
//! The counterpart listens on `http://localhost:<port>` and exposes five
//! endpoints:
//!
//! | Endpoint | Method | Response |
//! |---|---|---|
//! | `/list_armatures` | GET | `{armatures: [...]}` |
//! | `/export_animation/{armature}` | GET | animation bytes |
//! | `/import_animation?armature=` | POST | `{success}` |
//! | `/animation_status?armature=&last_known_hash=` | GET | `{hasChanged, hash}` |
//! | `/get_bone_rest/{armature}` | GET | `{bone: restPose}` |
//!
//! Names in the direction of travel are from the counterpart's point of view:
//! importing here fetches what the counterpart exports.

mod client;
mod error;
pub mod protocol;

pub use client::{Transport, TransportClient, DEFAULT_HOST};
pub use error::TransportError;
pub use protocol::{AnimationStatus, BoneRest};
