use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::error::AnimateError;
use crate::interval::Interval;
use crate::model::{AnimationScenario, AnimationStep, NavigationFlavor};

pub const DEFAULT_GRAFANA_URL: &str = "http://localhost:3000";
const DEFAULT_SCENARIO_NAME: &str = "default";

const BUILTIN_SCENARIOS: &str = r#"
scenarios:
  playdemo:
    grafana_url: https://play.grafana.org/
    dashboard_uid: "000000012"
    steps:
      - start: 2021-11-14T00:00:00Z
        end: 2021-11-14T02:00:00Z
        interval: 10min
        mode: expand
      - start: 2021-11-14T02:00:00Z
        end: 2021-11-14T04:00:00Z
        interval: 30min
        mode: window
  playdemo-yearly:
    grafana_url: https://play.grafana.org/
    dashboard_uid: "000000012"
    steps:
      - start: 2015-01-01T00:00:00Z
        end: 2021-01-01T00:00:00Z
        interval: yearly
"#;

/// Where a scenario comes from, parsed from `--scenario`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioRef {
    Builtin { name: String },
    File { path: PathBuf, name: Option<String> },
}

impl ScenarioRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(AnimateError::configuration("--scenario is mandatory").into());
        }

        if let Some((path, name)) = value.rsplit_once(':') {
            if is_scenario_file(path) {
                let name = name.trim();
                if name.is_empty() {
                    return Err(AnimateError::configuration(format!(
                        "invalid --scenario '{raw}': missing scenario name after ':'"
                    ))
                    .into());
                }
                return Ok(Self::File {
                    path: PathBuf::from(path),
                    name: Some(name.to_owned()),
                });
            }
        }

        if is_scenario_file(value) {
            return Ok(Self::File {
                path: PathBuf::from(value),
                name: None,
            });
        }

        Ok(Self::Builtin {
            name: value.to_owned(),
        })
    }

    /// Short name used for spool and result paths: `name`, `stem-name` or `stem`.
    pub fn spool_name(&self) -> String {
        match self {
            Self::Builtin { name } => name.clone(),
            Self::File { path, name } => {
                let stem = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                match name {
                    Some(name) => format!("{stem}-{name}"),
                    None => stem,
                }
            }
        }
    }

    pub fn display_label(&self) -> String {
        match self {
            Self::Builtin { name } => name.clone(),
            Self::File {
                path,
                name: Some(name),
            } => format!("{}:{name}", path.display()),
            Self::File { path, name: None } => path.display().to_string(),
        }
    }
}

fn is_scenario_file(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml")
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioFile {
    scenarios: BTreeMap<String, ScenarioDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioDefinition {
    #[serde(default)]
    grafana_url: Option<String>,
    #[serde(default)]
    dashboard_uid: Option<String>,
    steps: Vec<StepDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepDefinition {
    start: String,
    end: String,
    interval: String,
    #[serde(default)]
    mode: NavigationFlavor,
}

pub fn list_builtin_scenarios() -> Result<Vec<String>> {
    let file = parse_scenario_file(BUILTIN_SCENARIOS, Path::new("<builtin>"))?;
    Ok(file.scenarios.into_keys().collect())
}

pub fn load_scenario(reference: &ScenarioRef) -> Result<AnimationScenario> {
    let (file, origin, wanted) = match reference {
        ScenarioRef::Builtin { name } => (
            parse_scenario_file(BUILTIN_SCENARIOS, Path::new("<builtin>"))?,
            PathBuf::from("<builtin>"),
            Some(name.as_str()),
        ),
        ScenarioRef::File { path, name } => {
            let contents = fs::read_to_string(path).map_err(|error| {
                AnimateError::configuration(format!(
                    "failed to read scenario file {}: {error}",
                    path.display()
                ))
            })?;
            (
                parse_scenario_file(&contents, path)?,
                path.clone(),
                name.as_deref(),
            )
        }
    };

    let (name, definition) = select_definition(file, wanted, &origin)?;
    build_scenario(name, definition)
        .with_context(|| format!("invalid scenario '{}'", reference.display_label()))
}

fn parse_scenario_file(contents: &str, origin: &Path) -> Result<ScenarioFile> {
    serde_yaml::from_str(contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        AnimateError::configuration(format!(
            "failed to parse scenario yaml in {} at {}: {}",
            origin.display(),
            location,
            error
        ))
        .into()
    })
}

fn select_definition(
    mut file: ScenarioFile,
    wanted: Option<&str>,
    origin: &Path,
) -> Result<(String, ScenarioDefinition)> {
    let known = file.scenarios.keys().cloned().collect::<Vec<_>>().join(", ");
    let name = match wanted {
        Some(name) => name.to_owned(),
        None if file.scenarios.len() == 1 => file
            .scenarios
            .keys()
            .next()
            .cloned()
            .unwrap_or_default(),
        None => DEFAULT_SCENARIO_NAME.to_owned(),
    };

    file.scenarios
        .remove(&name)
        .map(|definition| (name.clone(), definition))
        .ok_or_else(|| {
            AnimateError::configuration(format!(
                "scenario '{name}' not found in {} (available: {known})",
                origin.display()
            ))
            .into()
        })
}

fn build_scenario(name: String, definition: ScenarioDefinition) -> Result<AnimationScenario> {
    let steps = definition
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            build_step(step).with_context(|| format!("step {index} of scenario '{name}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    let scenario = AnimationScenario {
        name,
        steps,
        grafana_url: definition.grafana_url,
        dashboard_uid: definition.dashboard_uid,
    };
    scenario.validate()?;
    Ok(scenario)
}

fn build_step(step: &StepDefinition) -> Result<AnimationStep> {
    let start = parse_timestamp(&step.start, "start")?;
    let end = parse_timestamp(&step.end, "end")?;
    let interval = Interval::parse(&step.interval)?;
    AnimationStep::new(start, end, interval, step.mode)
}

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| {
            AnimateError::configuration(format!(
                "{field} '{raw}' is not an RFC 3339 timestamp: {error}"
            ))
            .into()
        })
}

/// Grafana instance and dashboard a run points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardTarget {
    pub grafana_url: Url,
    pub dashboard_uid: String,
}

impl AnimationScenario {
    /// Command-line values win over the scenario's own.
    pub fn apply_overrides(&mut self, grafana_url: Option<&str>, dashboard_uid: Option<&str>) {
        if let Some(url) = grafana_url.map(str::trim).filter(|url| !url.is_empty()) {
            self.grafana_url = Some(url.to_owned());
        }
        if let Some(uid) = dashboard_uid.map(str::trim).filter(|uid| !uid.is_empty()) {
            self.dashboard_uid = Some(uid.to_owned());
        }
    }

    pub fn target(&self) -> Result<DashboardTarget> {
        let raw_url = self
            .grafana_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(DEFAULT_GRAFANA_URL);
        let grafana_url = Url::parse(raw_url).map_err(|error| {
            AnimateError::configuration(format!("invalid grafana url '{raw_url}': {error}"))
        })?;
        if !matches!(grafana_url.scheme(), "http" | "https") {
            return Err(AnimateError::configuration(format!(
                "grafana url '{raw_url}' must use http or https"
            ))
            .into());
        }

        let dashboard_uid = self
            .dashboard_uid
            .as_deref()
            .map(str::trim)
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| {
                AnimateError::configuration(
                    "dashboard uid is mandatory, supply it with --dashboard-uid or in the scenario",
                )
            })?;
        if dashboard_uid.contains(&['/', '\\'][..]) || dashboard_uid == ".." {
            return Err(AnimateError::configuration(format!(
                "dashboard uid '{dashboard_uid}' must not contain path separators"
            ))
            .into());
        }

        Ok(DashboardTarget {
            grafana_url,
            dashboard_uid: dashboard_uid.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::error::find_animate_error;

    #[test]
    fn reference_forms_are_recognized() {
        assert_eq!(
            ScenarioRef::parse("playdemo").expect("builtin parses"),
            ScenarioRef::Builtin {
                name: "playdemo".to_owned()
            }
        );
        assert_eq!(
            ScenarioRef::parse("scenarios/demo.yaml:sunrise").expect("file+name parses"),
            ScenarioRef::File {
                path: PathBuf::from("scenarios/demo.yaml"),
                name: Some("sunrise".to_owned())
            }
        );
        assert_eq!(
            ScenarioRef::parse("demo.yml").expect("file parses"),
            ScenarioRef::File {
                path: PathBuf::from("demo.yml"),
                name: None
            }
        );
        assert_eq!(
            ScenarioRef::parse("scenarios/demo.yaml:sunrise")
                .expect("file+name parses")
                .spool_name(),
            "demo-sunrise"
        );
        assert!(ScenarioRef::parse("  ").is_err());
        assert!(ScenarioRef::parse("demo.yaml:").is_err());
    }

    #[test]
    fn builtin_playdemo_loads() {
        let scenario = load_scenario(&ScenarioRef::parse("playdemo").expect("parses"))
            .expect("playdemo loads");
        assert_eq!(scenario.steps.len(), 2);
        assert_eq!(scenario.steps[0].flavor(), NavigationFlavor::Expand);
        assert_eq!(scenario.dashboard_uid.as_deref(), Some("000000012"));
        assert_eq!(scenario.total_frames(), 16);
        let names = list_builtin_scenarios().expect("builtins list");
        assert!(names.contains(&"playdemo".to_owned()));
    }

    #[test]
    fn unknown_builtin_names_available_scenarios() {
        let error = load_scenario(&ScenarioRef::parse("nope").expect("parses"))
            .expect_err("unknown scenario should fail");
        assert!(error.to_string().contains("playdemo"));
        assert!(find_animate_error(&error).is_some());
    }

    #[test]
    fn scenario_file_single_entry_is_selected_without_name() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("one.yaml");
        fs::write(
            &path,
            r#"
scenarios:
  only:
    dashboard_uid: abc
    steps:
      - { start: "2021-01-01T00:00:00+01:00", end: "2021-01-01T01:00:00+01:00", interval: 30min }
"#,
        )
        .expect("scenario should write");

        let scenario = load_scenario(&ScenarioRef::File { path, name: None }).expect("loads");
        assert_eq!(scenario.name, "only");
        assert_eq!(scenario.total_frames(), 2);
        assert_eq!(scenario.steps[0].start().to_rfc3339(), "2020-12-31T23:00:00+00:00");
    }

    #[test]
    fn inverted_step_is_rejected_with_step_index() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("bad.yaml");
        fs::write(
            &path,
            r#"
scenarios:
  bad:
    dashboard_uid: abc
    steps:
      - { start: "2021-01-01T00:00:00Z", end: "2021-01-02T00:00:00Z", interval: daily }
      - { start: "2021-01-03T00:00:00Z", end: "2021-01-02T00:00:00Z", interval: daily }
"#,
        )
        .expect("scenario should write");

        let error = load_scenario(&ScenarioRef::File {
            path,
            name: Some("bad".to_owned()),
        })
        .expect_err("inverted step should fail");
        assert!(format!("{error:#}").contains("step 1"));
    }

    #[test]
    fn empty_steps_are_a_configuration_error() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("empty.yaml");
        fs::write(&path, "scenarios:\n  empty:\n    steps: []\n").expect("scenario should write");
        let error = load_scenario(&ScenarioRef::File { path, name: None })
            .expect_err("empty steps should fail");
        assert_eq!(
            find_animate_error(&error).map(AnimateError::code),
            Some("E_CONFIG")
        );
    }

    #[test]
    fn command_line_overrides_win_and_url_defaults_to_localhost() {
        let mut scenario = load_scenario(&ScenarioRef::parse("playdemo").expect("parses"))
            .expect("playdemo loads");
        scenario.apply_overrides(None, Some("override-uid"));
        let target = scenario.target().expect("target resolves");
        assert_eq!(target.dashboard_uid, "override-uid");
        assert_eq!(target.grafana_url.as_str(), "https://play.grafana.org/");

        scenario.grafana_url = None;
        let target = scenario.target().expect("target resolves");
        assert_eq!(target.grafana_url.as_str(), "http://localhost:3000/");
    }

    #[test]
    fn missing_dashboard_uid_is_fatal() {
        let mut scenario = load_scenario(&ScenarioRef::parse("playdemo").expect("parses"))
            .expect("playdemo loads");
        scenario.dashboard_uid = None;
        scenario.apply_overrides(Some("http://grafana:3000"), Some("  "));
        let error = scenario.target().expect_err("missing uid should fail");
        assert_eq!(
            find_animate_error(&error).map(AnimateError::code),
            Some("E_CONFIG")
        );

        scenario.apply_overrides(None, Some("../escape"));
        assert!(scenario.target().is_err());
    }
}
