use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::AnimateError;
use crate::timeline::Frame;

pub const DEFAULT_SPOOL_DIR: &str = "./var/spool";
pub const DEFAULT_RESULTS_DIR: &str = "./var/results";

const FILENAME_TIMESTAMP: &str = "%Y%m%dT%H%M%SZ";
// Digits in u64::MAX, so every sequence number sorts lexically.
const SEQUENCE_WIDTH: usize = 20;

/// Persists captured screenshots. Implementations must not reorder or rename.
pub trait FrameStore: Send + Sync {
    fn persist(&self, path: &Path, png: &[u8]) -> Result<()>;
}

/// Writes frames to the local filesystem through a temp file and a rename.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFrameStore;

impl FrameStore for FsFrameStore {
    fn persist(&self, path: &Path, png: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                AnimateError::capture_io(format!(
                    "failed to create frame directory {}: {error}",
                    parent.display()
                ))
            })?;
        }

        let partial = partial_path(path);
        fs::write(&partial, png).map_err(|error| {
            AnimateError::capture_io(format!(
                "failed to write frame {}: {error}",
                partial.display()
            ))
        })?;
        fs::rename(&partial, path).map_err(|error| {
            let _ = fs::remove_file(&partial);
            AnimateError::capture_io(format!(
                "failed to move frame into place at {}: {error}",
                path.display()
            ))
        })?;
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Directory layout of the capture spool for one scenario/dashboard pair.
#[derive(Debug, Clone)]
pub struct SpoolLayout {
    root: PathBuf,
    scenario_slug: String,
    dashboard_uid: String,
}

impl SpoolLayout {
    pub fn new(root: impl Into<PathBuf>, scenario: &str, dashboard_uid: &str) -> Self {
        Self {
            root: root.into(),
            scenario_slug: slug(scenario),
            dashboard_uid: dashboard_uid.to_owned(),
        }
    }

    pub fn scenario_slug(&self) -> &str {
        &self.scenario_slug
    }

    pub fn frame_dir(&self) -> PathBuf {
        self.root
            .join(&self.scenario_slug)
            .join(&self.dashboard_uid)
    }

    /// `{uid}_{sequence}_{from}_{to}.png`; lexical order equals capture order.
    pub fn frame_path(&self, frame: &Frame) -> PathBuf {
        self.frame_dir().join(format!(
            "{uid}_{seq:0width$}_{from}_{to}.png",
            uid = self.dashboard_uid,
            seq = frame.sequence_index,
            width = SEQUENCE_WIDTH,
            from = filename_timestamp(frame.effective_from),
            to = filename_timestamp(frame.effective_to),
        ))
    }

    pub fn frames_glob(&self) -> PathBuf {
        self.frame_dir().join(format!("{}_*.png", self.dashboard_uid))
    }
}

fn filename_timestamp(value: DateTime<Utc>) -> String {
    value.format(FILENAME_TIMESTAMP).to_string()
}

fn slug_separator() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is a valid regex"))
}

/// Lowercase, ASCII alphanumerics joined by single dashes.
pub fn slug(value: &str) -> String {
    let lower = value.to_lowercase();
    let joined = slug_separator().replace_all(&lower, "-");
    let trimmed = joined.trim_matches('-');
    if trimmed.is_empty() {
        "untitled".to_owned()
    } else {
        trimmed.to_owned()
    }
}
