// tests/worker_cycles.rs
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use feed_freshness_monitor::clock::{Clock, ManualClock};
use feed_freshness_monitor::config::MonitorConfig;
use feed_freshness_monitor::monitor::{CycleOutcome, Monitor, SourceWorker};
use feed_freshness_monitor::notify::{Notifier, NotifierMux, RecordingNotifier};
use feed_freshness_monitor::registry::{ActiveWindow, ExtractKind, Locator, SourceConfig, SourceRegistry};
use feed_freshness_monitor::render::mock::{MockRendererFactory, MockStep};
use feed_freshness_monitor::state::{SampleValue, Status};

fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 11, day)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn source(id: &str, window: Option<ActiveWindow>) -> SourceConfig {
    SourceConfig {
        id: id.into(),
        display_name: id.to_uppercase(),
        url: format!("https://feeds.test/{id}"),
        locator: Locator::Single("#asOn".into()),
        kind: ExtractKind::Text,
        cadence_secs: 60,
        window,
        group: "tab1min".into(),
    }
}

fn market_hours() -> ActiveWindow {
    ActiveWindow {
        start: NaiveTime::from_hms_opt(9, 15, 0),
        end: NaiveTime::from_hms_opt(15, 30, 0),
    }
}

struct Harness {
    monitor: Monitor,
    factory: MockRendererFactory,
    events: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
}

fn harness(dir: &Path, sources: Vec<SourceConfig>, start: NaiveDateTime) -> Harness {
    harness_with(dir, sources, start, |_| {})
}

fn harness_with(
    dir: &Path,
    sources: Vec<SourceConfig>,
    start: NaiveDateTime,
    tweak: impl FnOnce(&mut MonitorConfig),
) -> Harness {
    let mut config = MonitorConfig {
        state_dir: dir.to_path_buf(),
        settle_ms: 0,
        ..Default::default()
    };
    tweak(&mut config);
    let factory = MockRendererFactory::new();
    let events = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(ManualClock::new(start));
    let monitor = Monitor::new(
        &config,
        SourceRegistry::new(sources).unwrap(),
        Arc::new(factory.clone()),
        NotifierMux::new().with(events.clone() as Arc<dyn Notifier>),
        clock.clone() as Arc<dyn Clock>,
    );
    Harness {
        monitor,
        factory,
        events,
        clock,
    }
}

impl Harness {
    fn worker(&self, id: &str) -> SourceWorker {
        self.monitor.worker(id).unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn unchanged_timestamp_goes_stale_on_fourth_sample() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), vec![source("idx", None)], at(19, 12, 5, 10));
    let mut w = h.worker("idx");

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        h.factory.push_text("As on 19 Nov 2025 | 12:5");
        outcomes.push(w.run_cycle().await);
        h.clock.advance(chrono::Duration::minutes(1));
    }

    assert_eq!(
        outcomes,
        vec![
            CycleOutcome::Sampled(Some(Status::Ok)),
            CycleOutcome::Sampled(None),
            CycleOutcome::Sampled(None),
            CycleOutcome::Sampled(Some(Status::Stale)),
        ]
    );
    assert_eq!(h.events.statuses_for("idx"), vec![Status::Ok, Status::Stale]);

    let rec = h.monitor.snapshot().get("idx").cloned().unwrap();
    assert_eq!(rec.stale_count, 3);
    assert_eq!(rec.last_changed, Some(at(19, 12, 5, 10)));
    assert_eq!(rec.stale_events, vec![at(19, 12, 8, 10)]);
    assert_eq!(h.factory.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_extraction_is_invalid_after_retries_and_keeps_value() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), vec![source("idx", None)], at(19, 10, 0, 0));
    let mut w = h.worker("idx");

    h.factory.push_text("A");
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Ok)));

    h.clock.advance(chrono::Duration::minutes(1));
    h.factory.push_empty();
    let started = tokio::time::Instant::now();
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Invalid)));
    // three attempts, two pauses
    assert!(started.elapsed() >= std::time::Duration::from_millis(1200));

    let rec = h.monitor.snapshot().get("idx").cloned().unwrap();
    assert_eq!(rec.status, Status::Invalid);
    assert_eq!(rec.last_value, Some(SampleValue::Text("A".into())));
    assert_eq!(rec.last_changed, Some(at(19, 10, 0, 0)));
    assert_eq!(rec.stale_count, 0);
}

#[tokio::test(start_paused = true)]
async fn extraction_succeeding_on_a_retry_counts_as_a_sample() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), vec![source("idx", None)], at(19, 10, 0, 0));
    let mut w = h.worker("idx");

    h.factory.push(MockStep::Text(vec![None, Some("A".into())]));
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Ok)));
    assert_eq!(h.factory.fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn renderer_is_recreated_after_repeated_failures() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), vec![source("idx", None)], at(19, 10, 0, 0));
    let mut w = h.worker("idx");

    for _ in 0..3 {
        h.factory.push_fetch_error();
        assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Error)));
    }
    assert!(!w.has_renderer());
    assert_eq!(h.factory.creates(), 1);

    h.factory.push_text("A");
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Ok)));
    assert_eq!(h.factory.creates(), 2);
    assert_eq!(
        h.events.statuses_for("idx"),
        vec![Status::Error, Status::Error, Status::Error, Status::Ok]
    );
}

#[tokio::test(start_paused = true)]
async fn hung_navigation_times_out_as_error() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), vec![source("idx", None)], at(19, 10, 0, 0));
    let mut w = h.worker("idx");

    h.factory.push(MockStep::Hang);
    let started = tokio::time::Instant::now();
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Error)));
    assert!(started.elapsed() >= std::time::Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn renderer_creation_failure_is_an_error_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), vec![source("idx", None)], at(19, 10, 0, 0));
    let mut w = h.worker("idx");

    h.factory.fail_next_creates(1);
    h.factory.push_text("A");
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Error)));
    assert_eq!(h.factory.fetches(), 0);

    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Ok)));
    assert_eq!(h.factory.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn list_sources_compare_the_whole_list() {
    let dir = tempfile::tempdir().unwrap();
    let mut src = source("tickers", None);
    src.kind = ExtractKind::List;
    let h = harness(dir.path(), vec![src], at(19, 10, 0, 0));
    let mut w = h.worker("tickers");

    h.factory.push(MockStep::List(vec!["1.0".into(), "2.0".into()]));
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Ok)));
    h.factory.push(MockStep::List(vec!["1.0".into(), "2.0".into()]));
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(None));
    h.factory.push(MockStep::List(vec!["1.0".into(), "2.5".into()]));
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Ok)));

    let rec = h.monitor.snapshot().get("tickers").cloned().unwrap();
    assert_eq!(rec.stale_count, 0);
    assert_eq!(
        rec.last_value,
        Some(SampleValue::List(vec!["1.0".into(), "2.5".into()]))
    );
}

#[tokio::test(start_paused = true)]
async fn window_skips_then_completes_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), vec![source("idx", Some(market_hours()))], at(19, 9, 0, 0));
    let mut w = h.worker("idx");

    assert_eq!(w.run_cycle().await, CycleOutcome::Skipped);
    assert_eq!(h.factory.fetches(), 0);
    assert!(h.events.events().is_empty());

    h.clock.set(at(19, 9, 20, 0));
    h.factory.push_text("A");
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Ok)));

    h.clock.set(at(19, 15, 30, 0));
    assert_eq!(w.run_cycle().await, CycleOutcome::Completed { published: true });
    for m in 31..35 {
        h.clock.set(at(19, 15, m, 0));
        assert_eq!(w.run_cycle().await, CycleOutcome::Completed { published: false });
    }
    assert_eq!(h.factory.fetches(), 1);
    assert_eq!(h.events.statuses_for("idx"), vec![Status::Ok, Status::Completed]);

    let rec = h.monitor.snapshot().get("idx").cloned().unwrap();
    assert!(rec.completed);
    assert_eq!(rec.last_value, Some(SampleValue::Text("A".into())));
    assert_eq!(rec.last_changed, Some(at(19, 9, 20, 0)));
}

#[tokio::test(start_paused = true)]
async fn midnight_rotates_to_a_fresh_day() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), vec![source("idx", Some(market_hours()))], at(19, 10, 0, 0));
    let mut w = h.worker("idx");

    h.factory.push_text("A");
    w.run_cycle().await;
    h.clock.set(at(19, 16, 0, 0));
    assert_eq!(w.run_cycle().await, CycleOutcome::Completed { published: true });

    let day19 = dir.path().join("monitor_state_2025-11-19.json");
    let before = std::fs::read(&day19).unwrap();

    h.clock.set(at(20, 9, 20, 0));
    h.factory.push_text("A");
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Ok)));

    let snap = h.monitor.snapshot();
    assert_eq!(snap.day, at(20, 0, 0, 0).date());
    let rec = snap.get("idx").unwrap();
    assert!(!rec.completed);
    assert_eq!(rec.last_changed, Some(at(20, 9, 20, 0)));
    assert!(dir.path().join("monitor_state_2025-11-20.json").exists());
    assert_eq!(std::fs::read(&day19).unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn completed_day_survives_a_restart_and_is_announced_once() {
    let dir = tempfile::tempdir().unwrap();
    {
        let h = harness(dir.path(), vec![source("idx", Some(market_hours()))], at(19, 10, 0, 0));
        let mut w = h.worker("idx");
        h.factory.push_text("A");
        w.run_cycle().await;
        h.clock.set(at(19, 15, 45, 0));
        w.run_cycle().await;
    }

    let h = harness(dir.path(), vec![source("idx", Some(market_hours()))], at(19, 15, 50, 0));
    let mut w = h.worker("idx");
    assert_eq!(w.run_cycle().await, CycleOutcome::Completed { published: true });
    assert_eq!(w.run_cycle().await, CycleOutcome::Completed { published: false });
    assert_eq!(h.factory.fetches(), 0);
    assert_eq!(h.events.statuses_for("idx"), vec![Status::Completed]);
    assert_eq!(
        h.events.events()[0].last_value,
        Some(SampleValue::Text("A".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_run_every_source() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(
        dir.path(),
        vec![source("a", None), source("b", None)],
        at(19, 10, 0, 0),
    );
    h.factory.push_text("A").push_text("B");

    h.monitor.start();
    assert!(h.monitor.is_running());
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
    h.monitor.stop().await;
    assert!(!h.monitor.is_running());

    assert!(h.factory.fetches() >= 2);
    assert_eq!(h.factory.creates(), 2);
    let snap = h.monitor.snapshot();
    assert!(snap.get("a").unwrap().last_value.is_some());
    assert!(snap.get("b").unwrap().last_value.is_some());
}

#[tokio::test(start_paused = true)]
async fn lagging_reported_time_is_stale_on_first_sight() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), vec![source("idx", None)], at(19, 12, 10, 0));
    let mut w = h.worker("idx");

    h.factory.push_text("As on 19 Nov 2025 | 12:05");
    assert_eq!(w.run_cycle().await, CycleOutcome::Sampled(Some(Status::Stale)));
    assert_eq!(h.events.statuses_for("idx"), vec![Status::Stale]);

    let rec = h.monitor.snapshot().get("idx").cloned().unwrap();
    assert_eq!(rec.stale_count, 0);
    assert_eq!(rec.last_changed, Some(at(19, 12, 10, 0)));
    assert_eq!(rec.stale_events, vec![at(19, 12, 10, 0)]);
}

#[tokio::test(start_paused = true)]
async fn fetch_cap_makes_the_second_source_wait() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_with(
        dir.path(),
        vec![source("a", None), source("b", None)],
        at(19, 10, 0, 0),
        |cfg| cfg.max_concurrent_fetches = 1,
    );
    let mut wa = h.worker("a");
    let mut wb = h.worker("b");
    h.factory.push(MockStep::Hang).push(MockStep::Hang);

    let started = tokio::time::Instant::now();
    let (ra, rb) = tokio::join!(wa.run_cycle(), wb.run_cycle());
    assert_eq!(ra, CycleOutcome::Sampled(Some(Status::Error)));
    assert_eq!(rb, CycleOutcome::Sampled(Some(Status::Error)));
    // one 30s timeout after the other
    assert!(started.elapsed() >= std::time::Duration::from_secs(60));
    assert_eq!(h.factory.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn fetches_overlap_when_the_cap_allows() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_with(
        dir.path(),
        vec![source("a", None), source("b", None)],
        at(19, 10, 0, 0),
        |cfg| cfg.max_concurrent_fetches = 2,
    );
    let mut wa = h.worker("a");
    let mut wb = h.worker("b");
    h.factory.push(MockStep::Hang).push(MockStep::Hang);

    let started = tokio::time::Instant::now();
    let (ra, rb) = tokio::join!(wa.run_cycle(), wb.run_cycle());
    assert_eq!(ra, CycleOutcome::Sampled(Some(Status::Error)));
    assert_eq!(rb, CycleOutcome::Sampled(Some(Status::Error)));
    assert!(started.elapsed() < std::time::Duration::from_secs(60));
}
