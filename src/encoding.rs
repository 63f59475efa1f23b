use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Result};
use clap::ValueEnum;
use serde::Serialize;

use crate::error::AnimateError;

pub const DEFAULT_FRAMERATE: u32 = 2;
const STDERR_TAIL_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FfmpegMode {
    #[default]
    Auto,
    System,
    Sidecar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Gif,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Gif => "gif",
        }
    }
}

/// Turns an ordered list of still images into one composite artifact.
pub trait SequenceEncoder: Send + Sync {
    /// File extension of produced artifacts, without the dot.
    fn extension(&self) -> &str;

    /// Encode `frames` in the given order into `output_path`.
    fn encode(&self, frames: &[PathBuf], output_path: &Path) -> Result<()>;
}

/// Encodes frame sequences with an ffmpeg executable through the concat demuxer.
#[derive(Debug, Clone)]
pub struct FfmpegSequenceEncoder {
    mode: FfmpegMode,
    format: OutputFormat,
    framerate: u32,
}

impl FfmpegSequenceEncoder {
    pub fn new(mode: FfmpegMode, format: OutputFormat, framerate: u32) -> Result<Self> {
        if framerate == 0 {
            return Err(AnimateError::configuration("--framerate must be at least 1").into());
        }
        if mode == FfmpegMode::Sidecar && cfg!(not(feature = "sidecar_ffmpeg")) {
            return Err(AnimateError::configuration(
                "ffmpeg sidecar mode requested but dashlapse was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`.",
            )
            .into());
        }
        Ok(Self {
            mode,
            format,
            framerate,
        })
    }

    fn mode_label(&self) -> &'static str {
        match self.mode {
            FfmpegMode::Auto => "auto",
            FfmpegMode::System => "system",
            FfmpegMode::Sidecar => "sidecar",
        }
    }
}

impl SequenceEncoder for FfmpegSequenceEncoder {
    fn extension(&self) -> &str {
        self.format.extension()
    }

    fn encode(&self, frames: &[PathBuf], output_path: &Path) -> Result<()> {
        let Some(first) = frames.first() else {
            bail!(AnimateError::composition("no frames to encode"));
        };
        check_output_path(output_path)?;
        ensure_parent_dir(output_path)?;

        let padding = match self.format {
            OutputFormat::Mp4 => even_padding(first)?,
            OutputFormat::Gif => None,
        };

        let list_path = concat_list_path(output_path);
        fs::write(&list_path, concat_list(frames, self.framerate)?).map_err(|error| {
            AnimateError::composition(format!(
                "failed to write frame list {}: {error}",
                list_path.display()
            ))
        })?;

        let ffmpeg_path = resolve_ffmpeg_path(self.mode)?;
        let args = ffmpeg_args(&list_path, output_path, self.format, self.framerate, padding);
        tracing::debug!(
            mode = self.mode_label(),
            ffmpeg = %ffmpeg_path.display(),
            args = %args.join(" "),
            "invoking ffmpeg"
        );
        let result = run_ffmpeg(&ffmpeg_path, &args, self.mode_label());
        if let Err(error) = fs::remove_file(&list_path) {
            tracing::debug!(error = %error, path = %list_path.display(), "frame list left behind");
        }
        result
    }
}

fn check_output_path(output_path: &Path) -> Result<()> {
    let path_str = output_path.to_string_lossy();
    if path_str.len() > 1024 {
        bail!(AnimateError::composition("output path is suspiciously long"));
    }
    if path_str.chars().any(char::is_control) {
        bail!(AnimateError::composition(
            "output path contains invalid control characters"
        ));
    }
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|error| {
                AnimateError::composition(format!(
                    "failed to create output directory {}: {error}",
                    parent.display()
                ))
            })?;
        }
    }
    Ok(())
}

/// libx264 with yuv420p needs even dimensions; returns the padded size when the
/// frames are odd-sized.
fn even_padding(frame: &Path) -> Result<Option<(u32, u32)>> {
    let (width, height) = image::image_dimensions(frame).map_err(|error| {
        AnimateError::composition(format!(
            "failed to read frame dimensions from {}: {error}",
            frame.display()
        ))
    })?;
    let padded = (width + width % 2, height + height % 2);
    Ok((padded != (width, height)).then_some(padded))
}

fn concat_list_path(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".ffconcat");
    output_path.with_file_name(name)
}

/// ffconcat script listing every frame with a fixed display duration. The last
/// frame is repeated so its duration is honored.
fn concat_list(frames: &[PathBuf], framerate: u32) -> Result<String> {
    let duration = 1.0 / f64::from(framerate);
    let mut list = String::from("ffconcat version 1.0\n");
    let mut last = None;
    for frame in frames {
        let absolute = fs::canonicalize(frame).map_err(|error| {
            AnimateError::composition(format!("frame {} is unreadable: {error}", frame.display()))
        })?;
        let quoted = quote_concat_path(&absolute);
        list.push_str(&format!("file {quoted}\nduration {duration}\n"));
        last = Some(quoted);
    }
    if let Some(quoted) = last {
        list.push_str(&format!("file {quoted}\n"));
    }
    Ok(list)
}

fn quote_concat_path(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

pub fn ffmpeg_args(
    list_path: &Path,
    output_path: &Path,
    format: OutputFormat,
    framerate: u32,
    padding: Option<(u32, u32)>,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "concat".to_owned(),
        "-safe".to_owned(),
        "0".to_owned(),
        "-i".to_owned(),
        list_path.to_string_lossy().into_owned(),
        "-an".to_owned(),
    ];

    match format {
        OutputFormat::Mp4 => {
            args.push("-c:v".to_owned());
            args.push("libx264".to_owned());
            args.push("-pix_fmt".to_owned());
            args.push("yuv420p".to_owned());
            if let Some((width, height)) = padding {
                args.push("-vf".to_owned());
                args.push(format!("pad={width}:{height}"));
            }
            args.push("-movflags".to_owned());
            args.push("+faststart".to_owned());
        }
        OutputFormat::Gif => {
            args.push("-vf".to_owned());
            args.push("split[a][b];[a]palettegen[p];[b][p]paletteuse".to_owned());
            args.push("-loop".to_owned());
            args.push("0".to_owned());
        }
    }

    args.push("-r".to_owned());
    args.push(framerate.to_string());
    args.push(output_path.to_string_lossy().into_owned());
    args
}

fn resolve_ffmpeg_path(mode: FfmpegMode) -> Result<PathBuf> {
    match mode {
        FfmpegMode::Auto | FfmpegMode::System => Ok(PathBuf::from("ffmpeg")),
        FfmpegMode::Sidecar => {
            #[cfg(feature = "sidecar_ffmpeg")]
            {
                let path = ffmpeg_sidecar::paths::ffmpeg_path();
                if !path.exists() {
                    ffmpeg_sidecar::download::auto_download().map_err(|error| {
                        AnimateError::composition(format!(
                            "failed to auto-download ffmpeg sidecar binary: {error}"
                        ))
                    })?;
                }
                Ok(path)
            }
            #[cfg(not(feature = "sidecar_ffmpeg"))]
            {
                Err(AnimateError::configuration(
                    "ffmpeg sidecar mode requested but dashlapse was built without `sidecar_ffmpeg`",
                )
                .into())
            }
        }
    }
}

fn run_ffmpeg(ffmpeg_path: &Path, args: &[String], mode_label: &str) -> Result<()> {
    let output = Command::new(ffmpeg_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                AnimateError::composition(format!(
                    "ffmpeg executable not found (mode={mode_label}, resolved_path={}). Install ffmpeg (system mode) or use sidecar mode with `--features sidecar_ffmpeg`.",
                    ffmpeg_path.display()
                ))
            } else {
                AnimateError::composition(format!(
                    "failed to spawn ffmpeg process (mode={mode_label}, resolved_path={}): {error}",
                    ffmpeg_path.display()
                ))
            }
        })?;

    if !output.status.success() {
        bail!(AnimateError::composition(format!(
            "ffmpeg failed with status {} (mode={mode_label}, args='{}', stderr_tail='{}')",
            output.status,
            args.join(" "),
            stderr_tail(&output.stderr)
        )));
    }
    Ok(())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let chars = text.chars().collect::<Vec<_>>();
    let start = chars.len().saturating_sub(STDERR_TAIL_CHARS);
    chars[start..].iter().collect::<String>().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn mp4_args_pad_odd_frames_and_use_x264() {
        let args = ffmpeg_args(
            Path::new("/tmp/list.ffconcat"),
            Path::new("out/demo.mp4"),
            OutputFormat::Mp4,
            2,
            Some((1920, 1082)),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-f concat -safe 0 -i /tmp/list.ffconcat"));
        assert!(joined.contains("-c:v libx264 -pix_fmt yuv420p -vf pad=1920:1082"));
        assert!(joined.ends_with("-r 2 out/demo.mp4"));
    }

    #[test]
    fn gif_args_build_a_palette() {
        let args = ffmpeg_args(
            Path::new("list"),
            Path::new("demo.gif"),
            OutputFormat::Gif,
            5,
            None,
        );
        assert!(args.iter().any(|arg| arg.contains("palettegen")));
        assert!(!args.iter().any(|arg| arg == "libx264"));
    }

    #[test]
    fn concat_list_keeps_order_and_repeats_last_frame() {
        let dir = tempdir().expect("tempdir should create");
        let frames = ["b.png", "it's.png"]
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                fs::write(&path, b"png").expect("frame should write");
                path
            })
            .collect::<Vec<_>>();

        let list = concat_list(&frames, 4).expect("list builds");
        let files = list
            .lines()
            .filter(|line| line.starts_with("file "))
            .collect::<Vec<_>>();
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("b.png'"));
        assert!(files[1].ends_with(r"it'\''s.png'"));
        assert_eq!(files[1], files[2]);
        assert!(list.contains("duration 0.25"));
    }

    #[test]
    fn missing_frames_are_composition_errors() {
        let error = concat_list(&[PathBuf::from("/definitely/missing.png")], 2)
            .expect_err("missing frame should fail");
        assert!(error.to_string().contains("composition error"));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let noisy = "x".repeat(600) + " fatal: bad input ";
        let tail = stderr_tail(noisy.as_bytes());
        assert!(tail.ends_with("fatal: bad input"));
        assert!(tail.chars().count() <= STDERR_TAIL_CHARS);
    }

    #[test]
    fn zero_framerate_is_rejected() {
        assert!(FfmpegSequenceEncoder::new(FfmpegMode::System, OutputFormat::Mp4, 0).is_err());
        let encoder = FfmpegSequenceEncoder::new(FfmpegMode::Auto, OutputFormat::Gif, 2)
            .expect("encoder builds");
        assert_eq!(encoder.extension(), "gif");
    }
}
