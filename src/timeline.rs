use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::interval::Interval;
use crate::model::{AnimationScenario, AnimationStep, NavigationFlavor};

/// One tick of the animation, ready to be shown and captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub effective_from: DateTime<Utc>,
    pub effective_to: DateTime<Utc>,
    /// Scenario-wide, gap-free, starts at 0.
    pub sequence_index: u64,
    pub step_index: usize,
    pub tick_index: u64,
    pub interval: Interval,
    pub flavor: NavigationFlavor,
}

impl Frame {
    pub fn from_millis(&self) -> i64 {
        self.effective_from.timestamp_millis()
    }

    pub fn to_millis(&self) -> i64 {
        self.effective_to.timestamp_millis()
    }
}

/// Lazy walk over every tick of every step. Materializes one frame per `next()` and is
/// single-pass: build a new one to replay.
#[derive(Debug)]
pub struct FrameWindows<'a> {
    steps: &'a [AnimationStep],
    step_index: usize,
    tick_index: u64,
    tick_count: u64,
    next_sequence: u64,
}

impl<'a> FrameWindows<'a> {
    pub fn new(scenario: &'a AnimationScenario) -> Result<Self> {
        scenario.validate()?;
        Ok(Self {
            steps: &scenario.steps,
            step_index: 0,
            tick_index: 0,
            tick_count: scenario.steps[0].tick_count(),
            next_sequence: 0,
        })
    }
}

impl Iterator for FrameWindows<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        while self.tick_index >= self.tick_count {
            self.step_index += 1;
            let step = self.steps.get(self.step_index)?;
            self.tick_index = 0;
            self.tick_count = step.tick_count();
        }

        let step = &self.steps[self.step_index];
        let (effective_from, effective_to) = step.range_at(self.tick_index);
        let frame = Frame {
            effective_from,
            effective_to,
            sequence_index: self.next_sequence,
            step_index: self.step_index,
            tick_index: self.tick_index,
            interval: step.interval(),
            flavor: step.flavor(),
        };
        self.tick_index += 1;
        self.next_sequence += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let Some(current) = self.steps.get(self.step_index) else {
            return (0, Some(0));
        };
        let remaining = current.tick_count().saturating_sub(self.tick_index)
            + self.steps[self.step_index + 1..]
                .iter()
                .map(AnimationStep::tick_count)
                .sum::<u64>();
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0)
            .single()
            .expect("valid timestamp")
    }

    fn step(start: i64, end: i64, interval: &str, flavor: NavigationFlavor) -> AnimationStep {
        AnimationStep::new(
            t(start),
            t(end),
            Interval::parse(interval).expect("interval parses"),
            flavor,
        )
        .expect("step builds")
    }

    fn scenario(steps: Vec<AnimationStep>) -> AnimationScenario {
        AnimationScenario {
            name: "unit".to_owned(),
            steps,
            grafana_url: None,
            dashboard_uid: None,
        }
    }

    #[test]
    fn empty_scenario_refuses_to_build_a_generator() {
        assert!(FrameWindows::new(&scenario(Vec::new())).is_err());
    }

    #[test]
    fn single_instant_step_yields_one_frame() {
        let scenario = scenario(vec![step(0, 0, "5s", NavigationFlavor::Window)]);
        let frames = FrameWindows::new(&scenario)
            .expect("generator builds")
            .collect::<Vec<_>>();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].effective_from, t(0));
        assert_eq!(frames[0].effective_to, t(0));
    }

    #[test]
    fn size_hint_tracks_remaining_frames() {
        let scenario = scenario(vec![
            step(0, 10, "5s", NavigationFlavor::Window),
            step(0, 15, "5s", NavigationFlavor::Expand),
        ]);
        let mut windows = FrameWindows::new(&scenario).expect("generator builds");
        assert_eq!(windows.size_hint(), (5, Some(5)));
        windows.next();
        windows.next();
        assert_eq!(windows.size_hint(), (3, Some(3)));
        assert_eq!(windows.by_ref().count(), 3);
        assert_eq!(windows.size_hint(), (0, Some(0)));
        assert!(windows.next().is_none());
    }

    #[test]
    fn step_index_follows_step_boundaries() {
        let scenario = scenario(vec![
            step(0, 10, "5s", NavigationFlavor::Window),
            step(100, 100, "5s", NavigationFlavor::Expand),
        ]);
        let steps = FrameWindows::new(&scenario)
            .expect("generator builds")
            .map(|frame| (frame.step_index, frame.tick_index))
            .collect::<Vec<_>>();
        assert_eq!(steps, vec![(0, 0), (0, 1), (1, 0)]);
    }
}
