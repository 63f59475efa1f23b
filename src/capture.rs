//! Drives a [`RenderDriver`] through every frame of a scenario.
//!
//! Frames are captured strictly in generator order on a single session. Transient
//! render failures are retried with exponential backoff; exhausting the bound fails
//! the frame only. Configuration and capture i/o failures end the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result};

use crate::driver::{RenderDriver, RenderWait};
use crate::error::{self, AnimateError};
use crate::model::AnimationScenario;
use crate::storage::{FrameStore, SpoolLayout};
use crate::timeline::{Frame, FrameWindows};

const PROGRESS_EVERY: u64 = 10;

/// Backoff schedule for transient render failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts after the first one (0 = single attempt).
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Caps exponential growth.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)));
        Duration::from_millis(exponential.min(self.max_delay_ms))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// What to do with a frame that still fails once its retries are spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    SkipFrame,
    Abort,
}

#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub frame: Frame,
    pub file_path: PathBuf,
    pub success: bool,
    pub error: Option<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CaptureReport {
    pub results: Vec<CaptureResult>,
    pub succeeded: usize,
    pub failed: usize,
    /// Resolved once, after the first frame that rendered.
    pub dashboard_title: Option<String>,
}

impl CaptureReport {
    pub fn captured_paths(&self) -> impl Iterator<Item = &Path> {
        self.results
            .iter()
            .filter(|result| result.success)
            .map(|result| result.file_path.as_path())
    }

    fn record(&mut self, result: CaptureResult) {
        if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }
}

/// Owns the driver for the whole run and releases it on every exit path.
pub struct CaptureOrchestrator<D: RenderDriver> {
    driver: D,
    store: Arc<dyn FrameStore>,
    layout: SpoolLayout,
    wait: RenderWait,
    retry: RetryConfig,
    policy: FailurePolicy,
}

impl<D: RenderDriver> CaptureOrchestrator<D> {
    pub fn new(
        driver: D,
        store: Arc<dyn FrameStore>,
        layout: SpoolLayout,
        wait: RenderWait,
        retry: RetryConfig,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            driver,
            store,
            layout,
            wait,
            retry,
            policy,
        }
    }

    pub async fn run(mut self, scenario: &AnimationScenario) -> Result<CaptureReport> {
        let outcome = match FrameWindows::new(scenario) {
            Ok(frames) => self.drain(frames).await,
            Err(error) => Err(error),
        };

        let closed = self.driver.close().await;
        match (outcome, closed) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(report), Err(close_error)) => {
                tracing::warn!(error = %close_error, "failed to close render session");
                Ok(report)
            }
            (Err(error), closed) => {
                if let Err(close_error) = closed {
                    tracing::warn!(error = %close_error, "failed to close render session after abort");
                }
                Err(error)
            }
        }
    }

    async fn drain(&mut self, frames: FrameWindows<'_>) -> Result<CaptureReport> {
        let total = frames.size_hint().0 as u64;
        let mut report = CaptureReport::default();
        let mut title_requested = false;

        tracing::info!(
            frames = total,
            dir = %self.layout.frame_dir().display(),
            "capture started"
        );

        for frame in frames {
            let file_path = self.layout.frame_path(&frame);
            let (outcome, attempts) = self.capture_with_retry(&frame, &file_path).await;

            match outcome {
                Ok(()) => {
                    if !title_requested {
                        title_requested = true;
                        report.dashboard_title = self.resolve_title().await;
                    }
                    report.record(CaptureResult {
                        frame,
                        file_path,
                        success: true,
                        error: None,
                        attempts,
                    });
                }
                Err(error) => {
                    let detail = format!("{error:#}");
                    if error::is_fatal(&error) || self.policy == FailurePolicy::Abort {
                        tracing::error!(
                            sequence = frame.sequence_index,
                            error = %detail,
                            "capture aborted"
                        );
                        return Err(error.context(format!(
                            "capture aborted at frame {} of {total}",
                            frame.sequence_index + 1
                        )));
                    }
                    tracing::warn!(
                        sequence = frame.sequence_index,
                        attempts,
                        error = %detail,
                        "frame skipped"
                    );
                    report.record(CaptureResult {
                        frame,
                        file_path,
                        success: false,
                        error: Some(detail),
                        attempts,
                    });
                }
            }

            let done = frame.sequence_index + 1;
            tracing::debug!(
                sequence = frame.sequence_index,
                from = %frame.effective_from,
                to = %frame.effective_to,
                "frame processed"
            );
            if done % PROGRESS_EVERY == 0 || done == total {
                tracing::info!(
                    done,
                    total,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "capture progress"
                );
            }
        }

        Ok(report)
    }

    async fn capture_with_retry(&mut self, frame: &Frame, path: &Path) -> (Result<()>, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.capture_once(frame, path).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(
                            sequence = frame.sequence_index,
                            attempt,
                            "frame captured after retry"
                        );
                    }
                    return (Ok(()), attempt);
                }
                Err(error) => error,
            };

            if !error::is_retryable(&error) {
                return (Err(error), attempt);
            }
            if attempt >= self.retry.max_attempts() {
                return (Err(exhausted(frame, attempt, &error)), attempt);
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                sequence = frame.sequence_index,
                attempt,
                max_retries = self.retry.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "frame failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn capture_once(&mut self, frame: &Frame, path: &Path) -> Result<()> {
        self.driver.navigate(frame).await?;
        self.driver.await_render(self.wait).await?;
        self.driver.capture(path, self.store.as_ref()).await
    }

    async fn resolve_title(&mut self) -> Option<String> {
        match self.driver.dashboard_title().await {
            Ok(title) => {
                tracing::debug!(title = %title, "dashboard title resolved");
                Some(title)
            }
            Err(error) => {
                tracing::warn!(error = %error, "could not read dashboard title");
                None
            }
        }
    }
}

fn exhausted(frame: &Frame, attempts: u32, last: &Error) -> Error {
    AnimateError::render_fatal(format!(
        "frame {} gave up after {attempts} attempts: {last:#}",
        frame.sequence_index + 1
    ))
    .into()
}
