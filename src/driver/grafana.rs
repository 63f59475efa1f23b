use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::ImageFormat;
use serde_json::{json, Value};

use super::label::frame_label;
use super::webdriver::{WebDriverClient, WebDriverSession};
use super::{dashboard_url, RenderDriver, RenderSettings, RenderWait};
use crate::error::AnimateError;
use crate::scenario::DashboardTarget;
use crate::timeline::Frame;

const HEADER_SCRIPT: &str = include_str!("header.js");
const PANEL_EVENTS_SCRIPT: &str = include_str!("panel_events.js");
const PANEL_POLL_MILLIS: u64 = 100;
const TITLE_SUFFIX: &str = " - Grafana";

/// Drives a Grafana dashboard inside a WebDriver-controlled browser.
#[derive(Debug)]
pub struct GrafanaDriver {
    session: WebDriverSession,
    target: DashboardTarget,
    settings: RenderSettings,
    title: Option<String>,
}

impl GrafanaDriver {
    pub async fn connect(
        client: &WebDriverClient,
        target: DashboardTarget,
        settings: RenderSettings,
        render_timeout: Duration,
        headless: bool,
    ) -> Result<Self> {
        let mut session = client.new_session(headless).await?;
        let (width, height) = settings.window_size;
        let prepared = async {
            session.set_window_size(width, height).await?;
            session.set_script_timeout(render_timeout).await
        }
        .await;
        if let Err(error) = prepared {
            if let Err(cleanup) = session.delete().await {
                tracing::warn!(error = %cleanup, "failed to close browser session after setup error");
            }
            return Err(error.context("failed to prepare browser window"));
        }

        tracing::info!(
            grafana = %target.grafana_url,
            dashboard = %target.dashboard_uid,
            view = %settings.view,
            width,
            height,
            "connected to render surface"
        );
        Ok(Self {
            session,
            target,
            settings,
            title: None,
        })
    }

    async fn amend_header(&self, frame: &Frame) -> Result<()> {
        let directives = serde_json::to_value(self.settings.directives)
            .context("failed to encode header directives")?;
        let label = frame_label(frame, self.settings.datetime_format.as_deref());
        self.session
            .execute(HEADER_SCRIPT, vec![directives, Value::String(label)])
            .await
            .context("failed to amend dashboard header")?;
        Ok(())
    }
}

#[async_trait]
impl RenderDriver for GrafanaDriver {
    async fn navigate(&mut self, frame: &Frame) -> Result<()> {
        let url = dashboard_url(&self.target, &self.settings, Some(frame))?;
        tracing::debug!(url = %url, sequence = frame.sequence_index, "navigating");
        self.session
            .navigate(&url)
            .await
            .with_context(|| format!("failed to open {url}"))?;
        if self.settings.directives.amends_header() {
            self.amend_header(frame).await?;
        }
        Ok(())
    }

    async fn await_render(&mut self, wait: RenderWait) -> Result<()> {
        match wait {
            RenderWait::Exposure(exposure) => {
                if !exposure.is_zero() {
                    tokio::time::sleep(exposure).await;
                }
                Ok(())
            }
            RenderWait::PanelEvents { timeout } => {
                let panels = self
                    .session
                    .execute_async(PANEL_EVENTS_SCRIPT, vec![json!(PANEL_POLL_MILLIS)])
                    .await
                    .with_context(|| {
                        format!("panels did not finish rendering within {}s", timeout.as_secs())
                    })?;
                tracing::debug!(panels = %panels, "panels rendered");
                Ok(())
            }
        }
    }

    async fn snapshot(&mut self) -> Result<Vec<u8>> {
        let png = self.session.screenshot().await?;
        image::load_from_memory_with_format(&png, ImageFormat::Png).map_err(|error| {
            AnimateError::render_transient(format!("screenshot is not a valid PNG: {error}"))
        })?;
        Ok(png)
    }

    async fn dashboard_title(&mut self) -> Result<String> {
        if let Some(title) = &self.title {
            return Ok(title.clone());
        }
        let raw = self.session.title().await?;
        let title = clean_title(&raw, &self.target.dashboard_uid);
        self.title = Some(title.clone());
        Ok(title)
    }

    async fn close(&mut self) -> Result<()> {
        self.session.delete().await
    }
}

fn clean_title(raw: &str, fallback: &str) -> String {
    let title = raw.trim();
    let title = title.strip_suffix(TITLE_SUFFIX).unwrap_or(title).trim();
    if title.is_empty() {
        fallback.to_owned()
    } else {
        title.to_owned()
    }
}
