use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::capture::{FailurePolicy, RetryConfig};
use crate::driver::webdriver::DEFAULT_WEBDRIVER_URL;
use crate::driver::{
    DashboardView, RenderSettings, RenderWait, DEFAULT_EXPOSURE_SECONDS,
    DEFAULT_RENDER_TIMEOUT_SECONDS,
};
use crate::encoding::{FfmpegMode, OutputFormat, DEFAULT_FRAMERATE};
use crate::error::AnimateError;
use crate::header_layout::{HeaderDirectives, DEFAULT_HEADER_LAYOUT};
use crate::scenario::ScenarioRef;
use crate::storage::{DEFAULT_RESULTS_DIR, DEFAULT_SPOOL_DIR};

/// Slack on top of the render timeout for a single WebDriver round trip.
const HTTP_TIMEOUT_MARGIN: Duration = Duration::from_secs(15);

/// Everything one run needs, fixed before any network or disk work starts.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub scenario: ScenarioRef,
    pub grafana_url: Option<String>,
    pub dashboard_uid: Option<String>,
    pub exposure_time: f64,
    pub use_panel_events: bool,
    pub panel_id: Option<String>,
    pub dashboard_view: DashboardView,
    pub header_layout: Vec<String>,
    pub datetime_format: Option<String>,
    pub webdriver_url: String,
    pub window_size: (u32, u32),
    pub render_timeout: Duration,
    pub show_browser: bool,
    pub retry: RetryConfig,
    pub failure_policy: FailurePolicy,
    pub spool_dir: PathBuf,
    pub results_dir: PathBuf,
    pub framerate: u32,
    pub format: OutputFormat,
    pub ffmpeg_mode: FfmpegMode,
    pub skip_render: bool,
}

impl RunOptions {
    pub fn new(scenario: ScenarioRef) -> Self {
        Self {
            scenario,
            grafana_url: None,
            dashboard_uid: None,
            exposure_time: DEFAULT_EXPOSURE_SECONDS,
            use_panel_events: false,
            panel_id: None,
            dashboard_view: DashboardView::Dashboard,
            header_layout: vec![DEFAULT_HEADER_LAYOUT.to_owned()],
            datetime_format: None,
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_owned(),
            window_size: (1920, 1080),
            render_timeout: Duration::from_secs(DEFAULT_RENDER_TIMEOUT_SECONDS),
            show_browser: false,
            retry: RetryConfig::default(),
            failure_policy: FailurePolicy::default(),
            spool_dir: PathBuf::from(DEFAULT_SPOOL_DIR),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            framerate: DEFAULT_FRAMERATE,
            format: OutputFormat::default(),
            ffmpeg_mode: FfmpegMode::default(),
            skip_render: false,
        }
    }

    /// Pre-flight checks. Every failure is a configuration error.
    pub fn validate(&self) -> Result<()> {
        self.render_settings()?;
        self.render_wait()?;
        self.webdriver_url()?;
        if self.render_timeout.is_zero() {
            return Err(AnimateError::configuration("--render-timeout must be positive").into());
        }
        if self.framerate == 0 {
            return Err(AnimateError::configuration("--framerate must be at least 1").into());
        }
        Ok(())
    }

    pub fn render_settings(&self) -> Result<RenderSettings> {
        let directives = HeaderDirectives::from_tokens(&self.header_layout)
            .context("invalid --header-layout")?;
        let datetime_format = self
            .datetime_format
            .as_deref()
            .map(str::trim)
            .filter(|format| !format.is_empty())
            .map(str::to_owned);
        RenderSettings::new(
            directives,
            datetime_format,
            self.panel_id.clone(),
            self.dashboard_view,
            self.window_size,
        )
    }

    pub fn render_wait(&self) -> Result<RenderWait> {
        RenderWait::new(self.exposure_time, self.use_panel_events, self.render_timeout)
    }

    pub fn webdriver_url(&self) -> Result<Url> {
        let raw = self.webdriver_url.trim();
        let mut url = Url::parse(raw).map_err(|error| {
            AnimateError::configuration(format!("invalid --webdriver-url '{raw}': {error}"))
        })?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn http_timeout(&self) -> Duration {
        self.render_timeout + HTTP_TIMEOUT_MARGIN
    }
}
