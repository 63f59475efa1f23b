//! Remote dashboard surface: navigation, render wait and screenshots.

pub mod grafana;
pub mod label;
pub mod webdriver;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::error::AnimateError;
use crate::header_layout::HeaderDirectives;
use crate::scenario::DashboardTarget;
use crate::storage::FrameStore;
use crate::timeline::Frame;

pub use grafana::GrafanaDriver;
pub use webdriver::{WebDriverClient, WebDriverSession};

pub const DEFAULT_EXPOSURE_SECONDS: f64 = 0.5;
pub const DEFAULT_RENDER_TIMEOUT_SECONDS: u64 = 30;

/// One logical browser session. Calls mutate remote state, so a driver is owned by a
/// single orchestrator and never shared.
#[async_trait]
pub trait RenderDriver: Send {
    /// Point the surface at the frame's time range and apply header amendments.
    async fn navigate(&mut self, frame: &Frame) -> Result<()>;

    async fn await_render(&mut self, wait: RenderWait) -> Result<()>;

    /// Full-surface PNG of the current state.
    async fn snapshot(&mut self) -> Result<Vec<u8>>;

    async fn dashboard_title(&mut self) -> Result<String>;

    /// Release the remote session. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;

    async fn capture(&mut self, path: &Path, store: &dyn FrameStore) -> Result<()> {
        let png = self.snapshot().await?;
        store.persist(path, &png)
    }
}

/// How to let the surface settle before a capture. Panel events replace the fixed
/// exposure entirely, so the two can never both apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderWait {
    Exposure(Duration),
    PanelEvents { timeout: Duration },
}

impl RenderWait {
    pub fn new(exposure_seconds: f64, use_panel_events: bool, timeout: Duration) -> Result<Self> {
        if use_panel_events {
            return Ok(Self::PanelEvents { timeout });
        }
        if !exposure_seconds.is_finite() || exposure_seconds < 0.0 {
            return Err(AnimateError::configuration(format!(
                "--exposure-time must be a non-negative number of seconds, got {exposure_seconds}"
            ))
            .into());
        }
        Ok(Self::Exposure(Duration::from_secs_f64(exposure_seconds)))
    }

    pub fn effective_exposure(&self) -> Duration {
        match self {
            Self::Exposure(exposure) => *exposure,
            Self::PanelEvents { .. } => Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DashboardView {
    #[default]
    Dashboard,
    /// Single panel without any dashboard chrome.
    Solo,
}

impl DashboardView {
    fn path_segment(self) -> &'static str {
        match self {
            Self::Dashboard => "d",
            Self::Solo => "d-solo",
        }
    }
}

impl FromStr for DashboardView {
    type Err = AnimateError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "d" | "dashboard" => Ok(Self::Dashboard),
            "d-solo" | "solo" => Ok(Self::Solo),
            other => Err(AnimateError::configuration(format!(
                "unknown --dashboard-view '{other}' (accepted: d, d-solo)"
            ))),
        }
    }
}

impl fmt::Display for DashboardView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// Everything a driver needs to know about presentation, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSettings {
    pub directives: HeaderDirectives,
    pub datetime_format: Option<String>,
    pub panel_id: Option<String>,
    pub view: DashboardView,
    pub window_size: (u32, u32),
}

impl RenderSettings {
    pub fn new(
        directives: HeaderDirectives,
        datetime_format: Option<String>,
        panel_id: Option<String>,
        view: DashboardView,
        window_size: (u32, u32),
    ) -> Result<Self> {
        let panel_id = panel_id
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty());
        if view == DashboardView::Solo && panel_id.is_none() {
            return Err(AnimateError::configuration(
                "--panel-id is mandatory for --dashboard-view=d-solo",
            )
            .into());
        }
        if window_size.0 == 0 || window_size.1 == 0 {
            return Err(AnimateError::configuration(format!(
                "window size must be positive, got {}x{}",
                window_size.0, window_size.1
            ))
            .into());
        }
        Ok(Self {
            directives,
            datetime_format,
            panel_id,
            view,
            window_size,
        })
    }
}

pub fn parse_window_size(raw: &str) -> Result<(u32, u32)> {
    let value = raw.trim();
    let invalid = || {
        AnimateError::configuration(format!(
            "invalid window size '{raw}': expected WIDTHxHEIGHT"
        ))
    };
    let (width, height) = value
        .split_once('x')
        .or_else(|| value.split_once('X'))
        .ok_or_else(invalid)?;
    let width = width.trim().parse::<u32>().map_err(|_| invalid())?;
    let height = height.trim().parse::<u32>().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid().into());
    }
    Ok((width, height))
}

/// Dashboard URL for one frame: time range in epoch milliseconds plus view options.
pub fn dashboard_url(
    target: &DashboardTarget,
    settings: &RenderSettings,
    frame: Option<&Frame>,
) -> Result<Url> {
    let mut url = target.grafana_url.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            AnimateError::configuration(format!(
                "grafana url '{}' cannot be used as a base",
                target.grafana_url
            ))
        })?;
        segments
            .pop_if_empty()
            .push(settings.view.path_segment())
            .push(&target.dashboard_uid);
    }

    {
        let mut query = url.query_pairs_mut();
        query.clear().append_pair("orgId", "1");
        if let Some(frame) = frame {
            query
                .append_pair("from", &frame.from_millis().to_string())
                .append_pair("to", &frame.to_millis().to_string());
        }
        if let Some(panel_id) = &settings.panel_id {
            query.append_pair("panelId", panel_id);
            if settings.view == DashboardView::Dashboard {
                query.append_key_only("fullscreen");
            }
        }
        if settings.directives.kiosk {
            query.append_key_only("kiosk");
        }
    }
    Ok(url)
}
