use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dashlapse::capture::{FailurePolicy, RetryConfig};
use dashlapse::compositor::CompositionManifest;
use dashlapse::config::RunOptions;
use dashlapse::driver::webdriver::DEFAULT_WEBDRIVER_URL;
use dashlapse::driver::{
    parse_window_size, DEFAULT_EXPOSURE_SECONDS, DEFAULT_RENDER_TIMEOUT_SECONDS,
};
use dashlapse::encoding::{FfmpegMode, OutputFormat, DEFAULT_FRAMERATE};
use dashlapse::error::{find_animate_error, AnimateError, ErrorEnvelope};
use dashlapse::header_layout::DEFAULT_HEADER_LAYOUT;
use dashlapse::pipeline::{run_animation, RunSummary};
use dashlapse::scenario::{list_builtin_scenarios, ScenarioRef};
use dashlapse::storage::{DEFAULT_RESULTS_DIR, DEFAULT_SPOOL_DIR};

#[derive(Debug, Parser)]
#[command(name = "dashlapse", version = env!("DASHLAPSE_VERSION"))]
#[command(about = "Step a Grafana dashboard through time and compile the captures into a time-lapse")]
struct Cli {
    /// Built-in name, `file.yaml` or `file.yaml:name`.
    #[arg(long)]
    scenario: Option<String>,

    #[arg(long, env = "DASHLAPSE_GRAFANA_URL")]
    grafana_url: Option<String>,

    #[arg(long)]
    dashboard_uid: Option<String>,

    /// Seconds to let each frame finish rendering.
    #[arg(long, default_value_t = DEFAULT_EXPOSURE_SECONDS, allow_negative_numbers = true)]
    exposure_time: f64,

    /// Wait for panels to report completion instead of a fixed exposure.
    #[arg(long)]
    use_panel_events: bool,

    #[arg(long)]
    panel_id: Option<String>,

    /// `d` (dashboard) or `d-solo` (single panel, needs --panel-id).
    #[arg(long, default_value = "d")]
    dashboard_view: String,

    /// Repeatable or comma separated: studio, no-chrome, large-font,
    /// collapse-datetime, no-folder, no-title, no-datetime.
    #[arg(long, default_value = DEFAULT_HEADER_LAYOUT)]
    header_layout: Vec<String>,

    /// Moment-style format such as `YYYY-MM-DD HH:mm`, or human-date, human-time,
    /// human-datetime. Empty picks one from the step interval.
    #[arg(long)]
    datetime_format: Option<String>,

    #[arg(long, env = "DASHLAPSE_WEBDRIVER_URL", default_value = DEFAULT_WEBDRIVER_URL)]
    webdriver_url: String,

    #[arg(long, default_value = "1920x1080")]
    window_size: String,

    /// Upper bound in seconds for panel events and each browser round trip.
    #[arg(long, default_value_t = DEFAULT_RENDER_TIMEOUT_SECONDS)]
    render_timeout: u64,

    /// Run the browser with a visible window.
    #[arg(long)]
    show_browser: bool,

    #[arg(long, default_value_t = RetryConfig::default().max_retries)]
    max_retries: u32,

    /// Abort the run when a frame still fails after its retries.
    #[arg(long)]
    fail_fast: bool,

    #[arg(long, default_value = DEFAULT_SPOOL_DIR)]
    spool_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
    results_dir: PathBuf,

    /// Captured frames per second of output.
    #[arg(long, default_value_t = DEFAULT_FRAMERATE)]
    framerate: u32,

    #[arg(long, value_enum, default_value_t = OutputFormat::Mp4)]
    format: OutputFormat,

    #[arg(long, value_enum, default_value_t = FfmpegMode::Auto)]
    ffmpeg_mode: FfmpegMode,

    /// Capture frames only; do not compose a video.
    #[arg(long)]
    skip_render: bool,

    /// Print the result manifest (or error envelope) as JSON on stdout.
    #[arg(long)]
    json: bool,

    #[arg(long)]
    debug: bool,

    /// Print the built-in scenario names and exit.
    #[arg(long)]
    list_scenarios: bool,
}

impl Cli {
    fn into_options(self) -> Result<RunOptions> {
        let scenario = ScenarioRef::parse(self.scenario.as_deref().unwrap_or_default())?;
        let mut options = RunOptions::new(scenario);
        options.grafana_url = self.grafana_url;
        options.dashboard_uid = self.dashboard_uid;
        options.exposure_time = self.exposure_time;
        options.use_panel_events = self.use_panel_events;
        options.panel_id = self.panel_id;
        options.dashboard_view = self.dashboard_view.parse()?;
        options.header_layout = self.header_layout;
        options.datetime_format = self.datetime_format;
        options.webdriver_url = self.webdriver_url;
        options.window_size = parse_window_size(&self.window_size)?;
        options.render_timeout = Duration::from_secs(self.render_timeout);
        options.show_browser = self.show_browser;
        options.retry.max_retries = self.max_retries;
        options.failure_policy = if self.fail_fast {
            FailurePolicy::Abort
        } else {
            FailurePolicy::SkipFrame
        };
        options.spool_dir = self.spool_dir;
        options.results_dir = self.results_dir;
        options.framerate = self.framerate;
        options.format = self.format;
        options.ffmpeg_mode = self.ffmpeg_mode;
        options.skip_render = self.skip_render;
        options.validate()?;
        Ok(options)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let json = cli.json;

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if json {
                match serde_json::to_string_pretty(&ErrorEnvelope::from_error(&error)) {
                    Ok(envelope) => println!("{envelope}"),
                    Err(encode_error) => eprintln!("failed to encode error envelope: {encode_error}"),
                }
            }
            eprintln!("error: {error:#}");
            let code = find_animate_error(&error).map_or(1, AnimateError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug {
        "dashlapse=debug"
    } else {
        "dashlapse=info"
    };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_scenarios {
        for name in list_builtin_scenarios()? {
            println!("{name}");
        }
        return Ok(());
    }

    let json = cli.json;
    let options = cli.into_options()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let summary = runtime.block_on(run_animation(&options))?;

    check_outcome(&summary, options.skip_render)?;
    if json {
        print_json(&summary)
    } else {
        print_text(&summary, options.skip_render);
        Ok(())
    }
}

/// A run that produced nothing usable is a failure, even if no single step aborted.
fn check_outcome(summary: &RunSummary, skip_render: bool) -> Result<()> {
    if summary.capture.succeeded == 0 {
        return Err(AnimateError::render_fatal(format!(
            "no frames were captured ({} failed)",
            summary.capture.failed
        ))
        .into());
    }
    let failed_groups = summary.manifest.failures().count();
    if !skip_render && failed_groups > 0 {
        let details = summary
            .manifest
            .failures()
            .filter_map(|entry| entry.error.as_deref())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(AnimateError::composition(format!(
            "{failed_groups} group(s) failed to compose: {details}"
        ))
        .into());
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    ok: bool,
    produced: usize,
    frames_succeeded: usize,
    frames_failed: usize,
    stale_frames: usize,
    dashboard_title: Option<&'a str>,
    manifest: &'a CompositionManifest,
}

fn print_json(summary: &RunSummary) -> Result<()> {
    let report = JsonReport {
        ok: true,
        produced: summary.manifest.produced(),
        frames_succeeded: summary.capture.succeeded,
        frames_failed: summary.capture.failed,
        stale_frames: summary.stale_frames,
        dashboard_title: summary.capture.dashboard_title.as_deref(),
        manifest: &summary.manifest,
    };
    let text = serde_json::to_string_pretty(&report).context("failed to encode result manifest")?;
    println!("{text}");
    Ok(())
}

fn print_text(summary: &RunSummary, skip_render: bool) {
    if skip_render {
        println!(
            "Captured {} frames ({} failed), composition skipped",
            summary.capture.succeeded, summary.capture.failed
        );
        return;
    }
    println!("Produced {} results", summary.manifest.produced());
    for entry in &summary.manifest.entries {
        if let Some(path) = &entry.output_path {
            println!("  {} ({} frames)", path.display(), entry.frame_count);
        }
    }
}
