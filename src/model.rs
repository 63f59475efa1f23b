use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AnimateError;
use crate::interval::Interval;

/// How a frame's time range is presented to the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationFlavor {
    /// Fixed-width slice `[start + i*I, start + (i+1)*I]`.
    #[default]
    Window,
    /// Anchored at the step start, growing to `start + (i+1)*I`.
    #[serde(alias = "cumulative")]
    Expand,
}

impl NavigationFlavor {
    pub fn range(
        self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: &Interval,
        index: u64,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let to = interval.advance(start, index + 1).min(end);
        match self {
            Self::Window => (interval.advance(start, index).min(end), to),
            Self::Expand => (start, to),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationStep {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
    flavor: NavigationFlavor,
}

impl AnimationStep {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
        flavor: NavigationFlavor,
    ) -> Result<Self> {
        if start > end {
            return Err(AnimateError::configuration(format!(
                "animation step starts after it ends ({} > {})",
                start.to_rfc3339(),
                end.to_rfc3339()
            ))
            .into());
        }
        Ok(Self {
            start,
            end,
            interval,
            flavor,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn flavor(&self) -> NavigationFlavor {
        self.flavor
    }

    pub fn tick_count(&self) -> u64 {
        self.interval.tick_count(self.start, self.end)
    }

    /// Renderer-facing range of tick `index`, capped at the step end.
    pub fn range_at(&self, index: u64) -> (DateTime<Utc>, DateTime<Utc>) {
        self.flavor.range(self.start, self.end, &self.interval, index)
    }
}

#[derive(Debug, Clone)]
pub struct AnimationScenario {
    pub name: String,
    pub steps: Vec<AnimationStep>,
    pub grafana_url: Option<String>,
    pub dashboard_uid: Option<String>,
}

impl AnimationScenario {
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(AnimateError::configuration(format!(
                "scenario '{}' must define at least one step",
                self.name
            ))
            .into());
        }
        Ok(())
    }

    pub fn total_frames(&self) -> u64 {
        self.steps.iter().map(AnimationStep::tick_count).sum()
    }
}
