use std::sync::Arc;

use anyhow::Result;

use crate::capture::{CaptureOrchestrator, CaptureReport};
use crate::compositor::{ArtifactCompositor, CompositionManifest, OutputNaming};
use crate::config::RunOptions;
use crate::driver::{GrafanaDriver, RenderDriver, WebDriverClient};
use crate::encoding::{FfmpegSequenceEncoder, SequenceEncoder};
use crate::model::AnimationScenario;
use crate::scenario::{load_scenario, DashboardTarget};
use crate::storage::{FsFrameStore, SpoolLayout};

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub capture: CaptureReport,
    pub manifest: CompositionManifest,
    /// Composed frames that this run did not capture, left in the spool earlier.
    pub stale_frames: usize,
}

/// Resolve the scenario and target, open a browser session, capture, compose.
pub async fn run_animation(options: &RunOptions) -> Result<RunSummary> {
    options.validate()?;
    let mut scenario = load_scenario(&options.scenario)?;
    scenario.apply_overrides(options.grafana_url.as_deref(), options.dashboard_uid.as_deref());
    let target = scenario.target()?;
    let settings = options.render_settings()?;
    let encoder = FfmpegSequenceEncoder::new(options.ffmpeg_mode, options.format, options.framerate)?;

    tracing::info!(
        scenario = %options.scenario.display_label(),
        steps = scenario.steps.len(),
        frames = scenario.total_frames(),
        grafana = %target.grafana_url,
        dashboard = %target.dashboard_uid,
        "scenario resolved"
    );

    let client = WebDriverClient::new(options.webdriver_url()?, options.http_timeout())?;
    let driver = GrafanaDriver::connect(
        &client,
        target.clone(),
        settings,
        options.render_timeout,
        !options.show_browser,
    )
    .await?;

    run_with_driver(options, &scenario, &target, driver, &encoder).await
}

/// Capture with an already connected driver, then compose unless composition is
/// skipped. The driver is closed on every path, before composition starts.
pub async fn run_with_driver<D: RenderDriver>(
    options: &RunOptions,
    scenario: &AnimationScenario,
    target: &DashboardTarget,
    driver: D,
    encoder: &dyn SequenceEncoder,
) -> Result<RunSummary> {
    let wait = match options.render_wait() {
        Ok(wait) => wait,
        Err(error) => {
            let mut driver = driver;
            if let Err(close_error) = driver.close().await {
                tracing::warn!(error = %close_error, "failed to close render session");
            }
            return Err(error);
        }
    };
    let layout = SpoolLayout::new(
        &options.spool_dir,
        &options.scenario.spool_name(),
        &target.dashboard_uid,
    );
    let orchestrator = CaptureOrchestrator::new(
        driver,
        Arc::new(FsFrameStore),
        layout.clone(),
        wait,
        options.retry,
        options.failure_policy,
    );
    let capture = orchestrator.run(scenario).await?;
    tracing::info!(
        succeeded = capture.succeeded,
        failed = capture.failed,
        "capture finished"
    );

    if options.skip_render {
        tracing::info!("composition skipped");
        return Ok(RunSummary {
            capture,
            manifest: CompositionManifest::default(),
            stale_frames: 0,
        });
    }

    let title = capture
        .dashboard_title
        .clone()
        .unwrap_or_else(|| target.dashboard_uid.clone());
    let naming = OutputNaming {
        results_dir: &options.results_dir,
        scenario_slug: layout.scenario_slug(),
        dashboard_title: &title,
        dashboard_uid: &target.dashboard_uid,
    };
    let manifest = ArtifactCompositor::new(encoder).compose(&layout.frames_glob(), &naming)?;
    let stale_frames = stale_frame_count(&capture, &manifest);
    if stale_frames > 0 {
        tracing::warn!(
            stale_frames,
            dir = %layout.frame_dir().display(),
            "composite includes frames left by an earlier run"
        );
    }
    Ok(RunSummary {
        capture,
        manifest,
        stale_frames,
    })
}

fn stale_frame_count(capture: &CaptureReport, manifest: &CompositionManifest) -> usize {
    let composed = manifest
        .entries
        .iter()
        .map(|entry| entry.frame_count)
        .sum::<usize>();
    composed.saturating_sub(capture.captured_paths().count())
}
