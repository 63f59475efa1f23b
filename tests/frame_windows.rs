use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tempfile::tempdir;

use dashlapse::interval::Interval;
use dashlapse::model::{AnimationScenario, AnimationStep, NavigationFlavor};
use dashlapse::storage::SpoolLayout;
use dashlapse::timeline::{Frame, FrameWindows};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 11, 14, 0, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn step(start_s: i64, end_s: i64, interval: &str, flavor: NavigationFlavor) -> AnimationStep {
    AnimationStep::new(
        t0() + TimeDelta::seconds(start_s),
        t0() + TimeDelta::seconds(end_s),
        Interval::parse(interval).expect("interval should parse"),
        flavor,
    )
    .expect("step should build")
}

fn frames(steps: Vec<AnimationStep>) -> Vec<Frame> {
    let scenario = AnimationScenario {
        name: "props".to_owned(),
        steps,
        grafana_url: None,
        dashboard_uid: Some("uid".to_owned()),
    };
    FrameWindows::new(&scenario)
        .expect("generator should build")
        .collect()
}

#[test]
fn tick_count_is_ceiling_of_duration_over_interval() {
    let cases = [(0, 5, 1), (10, 5, 2), (11, 5, 3), (14, 5, 3), (15, 5, 3), (3600, 60, 60)];
    for (duration, interval, expected) in cases {
        let produced = frames(vec![step(
            0,
            duration,
            &format!("{interval}s"),
            NavigationFlavor::Window,
        )]);
        assert_eq!(
            produced.len(),
            expected,
            "duration {duration}s at {interval}s should yield {expected} frames"
        );
    }
}

#[test]
fn window_frames_are_contiguous_slices_no_wider_than_the_interval() {
    let interval = TimeDelta::seconds(7);
    let produced = frames(vec![step(0, 30, "7s", NavigationFlavor::Window)]);
    for (index, frame) in produced.iter().enumerate() {
        assert!(frame.effective_to - frame.effective_from <= interval);
        assert_eq!(frame.effective_from, t0() + interval * index as i32);
    }
    assert_eq!(
        produced.last().map(|frame| frame.effective_to),
        Some(t0() + TimeDelta::seconds(30))
    );
}

#[test]
fn expand_frames_stay_anchored_and_grow_strictly_until_capped() {
    let produced = frames(vec![step(0, 23, "5s", NavigationFlavor::Expand)]);
    assert!(produced.iter().all(|frame| frame.effective_from == t0()));
    for pair in produced.windows(2) {
        assert!(pair[0].effective_to < pair[1].effective_to);
    }
    assert_eq!(
        produced.last().map(|frame| frame.effective_to),
        Some(t0() + TimeDelta::seconds(23))
    );
}

#[test]
fn sequence_index_is_gap_free_across_steps() {
    let produced = frames(vec![
        step(0, 10, "5s", NavigationFlavor::Expand),
        step(10, 10, "5s", NavigationFlavor::Window),
        step(10, 40, "10s", NavigationFlavor::Window),
    ]);
    let sequence = produced
        .iter()
        .map(|frame| frame.sequence_index)
        .collect::<Vec<_>>();
    assert_eq!(sequence, (0..6).collect::<Vec<_>>());
}

#[test]
fn window_scenario_writes_two_files_in_capture_order() {
    let produced = frames(vec![step(0, 10, "5s", NavigationFlavor::Window)]);
    assert_eq!(produced.len(), 2);
    assert_eq!(
        (produced[0].effective_from, produced[0].effective_to),
        (t0(), t0() + TimeDelta::seconds(5))
    );
    assert_eq!(
        (produced[1].effective_from, produced[1].effective_to),
        (t0() + TimeDelta::seconds(5), t0() + TimeDelta::seconds(10))
    );

    let dir = tempdir().expect("tempdir should create");
    let layout = SpoolLayout::new(dir.path(), "window scenario", "uid");
    let paths = produced
        .iter()
        .map(|frame| layout.frame_path(frame))
        .collect::<Vec<_>>();
    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(sorted, paths);
}

#[test]
fn expand_scenario_grows_from_the_step_start() {
    let produced = frames(vec![step(0, 10, "5s", NavigationFlavor::Expand)]);
    let ranges = produced
        .iter()
        .map(|frame| (frame.effective_from, frame.effective_to))
        .collect::<Vec<_>>();
    assert_eq!(
        ranges,
        vec![
            (t0(), t0() + TimeDelta::seconds(5)),
            (t0(), t0() + TimeDelta::seconds(10)),
        ]
    );
}

#[test]
fn calendar_intervals_step_by_month() {
    let start = Utc
        .with_ymd_and_hms(2021, 1, 31, 0, 0, 0)
        .single()
        .expect("valid timestamp");
    let end = Utc
        .with_ymd_and_hms(2021, 4, 30, 0, 0, 0)
        .single()
        .expect("valid timestamp");
    let scenario = AnimationScenario {
        name: "monthly".to_owned(),
        steps: vec![AnimationStep::new(
            start,
            end,
            Interval::parse("monthly").expect("interval should parse"),
            NavigationFlavor::Window,
        )
        .expect("step should build")],
        grafana_url: None,
        dashboard_uid: None,
    };
    let produced = FrameWindows::new(&scenario)
        .expect("generator should build")
        .collect::<Vec<_>>();
    assert_eq!(produced.len(), 3);
    assert_eq!(
        produced[1].effective_from,
        Utc.with_ymd_and_hms(2021, 2, 28, 0, 0, 0)
            .single()
            .expect("valid timestamp")
    );
}
