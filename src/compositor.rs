//! Groups captured frames and hands each group to a [`SequenceEncoder`].

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use serde::Serialize;

use crate::encoding::SequenceEncoder;
use crate::error::{find_animate_error, AnimateError};
use crate::storage::slug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub group_key: String,
    pub output_path: Option<PathBuf>,
    pub frame_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one composition pass, in group order. Failed groups are recorded here
/// instead of failing the pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompositionManifest {
    pub entries: Vec<ManifestEntry>,
}

impl CompositionManifest {
    pub fn produced(&self) -> usize {
        self.outputs().count()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .filter_map(|entry| entry.output_path.as_deref())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|entry| entry.error.is_some())
    }
}

/// Naming inputs shared by every group of one run.
#[derive(Debug, Clone)]
pub struct OutputNaming<'a> {
    pub results_dir: &'a Path,
    pub scenario_slug: &'a str,
    pub dashboard_title: &'a str,
    pub dashboard_uid: &'a str,
}

impl OutputNaming<'_> {
    /// `{results}/{scenario}--{title}--{group}.{ext}`
    pub fn output_path(&self, group_key: &str, extension: &str) -> PathBuf {
        self.results_dir.join(format!(
            "{}--{}--{}.{extension}",
            self.scenario_slug,
            slug(self.dashboard_title),
            group_key
        ))
    }
}

pub struct ArtifactCompositor<'a> {
    encoder: &'a dyn SequenceEncoder,
}

impl<'a> ArtifactCompositor<'a> {
    pub fn new(encoder: &'a dyn SequenceEncoder) -> Self {
        Self { encoder }
    }

    pub fn compose(
        &self,
        frames_glob: &Path,
        naming: &OutputNaming<'_>,
    ) -> Result<CompositionManifest> {
        let frames = scan_glob(frames_glob)?;
        let mut groups = group_frames(frames);
        if groups.is_empty() {
            tracing::warn!(glob = %frames_glob.display(), "no frames matched, nothing to compose");
            groups.insert(naming.dashboard_uid.to_owned(), Vec::new());
        }

        let mut manifest = CompositionManifest::default();
        for (group_key, frames) in groups {
            manifest.entries.push(self.compose_group(group_key, &frames, naming));
        }
        Ok(manifest)
    }

    fn compose_group(
        &self,
        group_key: String,
        frames: &[PathBuf],
        naming: &OutputNaming<'_>,
    ) -> ManifestEntry {
        let frame_count = frames.len();
        if frame_count == 0 {
            return ManifestEntry {
                group_key,
                output_path: None,
                frame_count,
                error: None,
            };
        }

        let output_path = naming.output_path(&group_key, self.encoder.extension());
        tracing::info!(
            group = %group_key,
            frames = frame_count,
            output = %output_path.display(),
            "composing"
        );
        match self.encoder.encode(frames, &output_path) {
            Ok(()) => {
                tracing::info!(group = %group_key, output = %output_path.display(), "artifact produced");
                ManifestEntry {
                    group_key,
                    output_path: Some(output_path),
                    frame_count,
                    error: None,
                }
            }
            Err(error) => {
                let message = format!("{error:#}");
                let error = match find_animate_error(&error) {
                    Some(AnimateError::Composition(_)) => message,
                    _ => AnimateError::composition(message).to_string(),
                };
                tracing::warn!(group = %group_key, error = %error, "composition failed");
                ManifestEntry {
                    group_key,
                    output_path: None,
                    frame_count,
                    error: Some(error),
                }
            }
        }
    }
}

/// Translate a `*`/`?` file-name pattern into an anchored regex.
pub fn glob_regex(pattern: &str) -> Result<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|error| {
        AnimateError::configuration(format!("invalid frame pattern '{pattern}': {error}")).into()
    })
}

/// Every file matching the glob, in ascending path order.
pub fn scan_glob(pattern: &Path) -> Result<Vec<PathBuf>> {
    let dir = pattern.parent().unwrap_or_else(|| Path::new(""));
    if dir.to_string_lossy().contains(&['*', '?'][..]) {
        return Err(AnimateError::configuration(format!(
            "only the file name of '{}' may contain wildcards",
            pattern.display()
        ))
        .into());
    }
    let file_pattern = pattern
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            AnimateError::configuration(format!("'{}' has no file name", pattern.display()))
        })?;
    let matcher = glob_regex(&file_pattern)?;

    let read_from = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    let entries = match fs::read_dir(read_from) {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => {
            return Err(AnimateError::composition(format!(
                "failed to scan {}: {error}",
                read_from.display()
            ))
            .into())
        }
    };

    let mut matched = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|error| {
            AnimateError::composition(format!("failed to scan {}: {error}", read_from.display()))
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if matcher.is_match(name) && entry.path().is_file() {
            matched.push(dir.join(name));
        }
    }
    matched.sort();
    Ok(matched)
}

fn frame_name() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<uid>.+)_\d{6,}_\d{8}T\d{6}Z_\d{8}T\d{6}Z\.png$")
            .expect("frame name pattern is a valid regex")
    })
}

/// One group per dashboard uid, recovered from the frame file name. Order within a
/// group is the input order.
fn group_frames(frames: Vec<PathBuf>) -> BTreeMap<String, Vec<PathBuf>> {
    let mut groups = BTreeMap::<String, Vec<PathBuf>>::new();
    for frame in frames {
        let name = frame
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = frame_name()
            .captures(&name)
            .and_then(|captures| captures.name("uid"))
            .map(|uid| uid.as_str().to_owned())
            .or_else(|| name.split('_').next().map(str::to_owned))
            .unwrap_or_default();
        groups.entry(key).or_default().push(frame);
    }
    groups
}
