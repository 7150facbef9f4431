//! Host-side collaborators for the CLI: where imported animations go and how
//! warnings reach the user.

use std::path::{Path, PathBuf};

use rigsync_core::{Animation, AnimationSink, Notifier, Severity, SinkError};

/// Writes each imported animation to `<dir>/<armature>.json`, or to one
/// fixed file.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
    file: Option<PathBuf>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file: None,
        }
    }

    /// Writes every animation to `path` regardless of armature.
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            file: Some(path),
        }
    }

    /// Path the animation for `armature` is written to.
    pub fn path_for(&self, armature: &str) -> PathBuf {
        if let Some(file) = &self.file {
            return file.clone();
        }
        let file_name: String = armature
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        let stem = match file_name.trim_start_matches('.') {
            "" => "_",
            stem => stem,
        };
        self.dir.join(format!("{}.json", stem))
    }
}

/// Writes `animation` as pretty JSON.
pub fn write_animation(path: &Path, animation: &Animation) -> Result<(), SinkError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SinkError(format!("{}: {}", parent.display(), e)))?;
    }
    let json = serde_json::to_vec_pretty(animation).map_err(|e| SinkError(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| SinkError(format!("{}: {}", path.display(), e)))
}

impl AnimationSink<Animation> for FileSink {
    fn apply(&mut self, armature: &str, animation: Animation) -> Result<(), SinkError> {
        let path = self.path_for(armature);
        write_animation(&path, &animation)?;
        println!(
            "Imported '{}' for {} ({} frames, {} keyframes) -> {}",
            animation.name,
            armature,
            animation.frame_count(),
            animation.keyframe_count(),
            path.display()
        );
        Ok(())
    }
}

/// Prints notifications to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => eprintln!("{}", message),
            Severity::Warning => eprintln!("Warning: {}", message),
            Severity::Error => eprintln!("Error: {}", message),
        }
    }
}
