use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use camera_capture::{CameraKey, SourceStats, SyntheticFactory};
use compositor::{Canvas, Compositor, ScaleFilter};
use display_session::{
    ControllerError, DisplayController, DisplayMode, LatestFrameSink, SessionContext,
    SessionLayout, SessionSettings,
};

use CameraKey::{One, Three, Two};

struct Rig {
    controller: DisplayController,
    factory: Arc<SyntheticFactory>,
    stats: Arc<SourceStats>,
    sink: Arc<LatestFrameSink>,
}

fn fast_settings() -> SessionSettings {
    SessionSettings {
        read_timeout_ms: 10,
        failure_threshold: 5,
        reopen_interval_ms: 50,
        join_timeout_ms: 1000,
        target_fps: 100,
    }
}

fn rig_with(settings: SessionSettings) -> Rig {
    rig_from(SyntheticFactory::new(64, 48), settings)
}

fn rig_from(factory: SyntheticFactory, settings: SessionSettings) -> Rig {
    let factory = Arc::new(factory);
    let stats = factory.stats();
    let sink = Arc::new(LatestFrameSink::new());
    let controller = DisplayController::new(SessionContext {
        factory: factory.clone(),
        sink: sink.clone(),
        compositor: Compositor::new(Canvas::new(128, 60), ScaleFilter::Nearest),
        settings,
    });
    Rig {
        controller,
        factory,
        stats,
        sink,
    }
}

fn rig() -> Rig {
    rig_with(fast_settings())
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn assert_session_matches_mode(rig: &Rig) {
    let mode = rig.controller.current_mode();
    let snapshot = rig.controller.session_snapshot();
    match mode.layout() {
        Some(layout) => assert_eq!(snapshot.map(|s| s.layout), Some(layout)),
        None => assert!(snapshot.is_none()),
    }
}

#[test]
fn test_each_switch_leaves_one_matching_session() {
    let rig = rig();
    let modes = [
        DisplayMode::Multiview(One, Two),
        DisplayMode::Single(Three),
        DisplayMode::Single(One),
        DisplayMode::Multiview(Three, One),
        DisplayMode::Idle,
        DisplayMode::Single(Two),
    ];

    for mode in modes {
        rig.controller.switch_mode(mode).unwrap();
        assert_eq!(rig.controller.current_mode(), mode);
        assert_session_matches_mode(&rig);

        let expected = if mode == DisplayMode::Idle { 0 } else { 1 };
        assert_eq!(rig.controller.live_sessions(), expected);
        // Previous session's cameras are released before the new ones open
        let cameras = mode.layout().map(|l| l.keys().len()).unwrap_or(0);
        assert_eq!(rig.stats.total_live(), cameras);
    }

    rig.controller.shutdown();
}

#[test]
fn test_switching_to_same_mode_is_idempotent() {
    let rig = rig();
    rig.controller.switch_mode(DisplayMode::Single(One)).unwrap();
    let first = rig.controller.session_snapshot().unwrap().id;

    rig.controller.switch_mode(DisplayMode::Single(One)).unwrap();
    let second = rig.controller.session_snapshot().unwrap().id;

    assert_eq!(first, second);
    assert_eq!(rig.stats.opens(), 1);
    assert_eq!(rig.stats.live(One), 1);
    assert_eq!(rig.controller.live_sessions(), 1);

    rig.controller.shutdown();
}

#[test]
fn test_selection_toggle_law() {
    let rig = rig();
    rig.controller.switch_mode(DisplayMode::Single(One)).unwrap();
    rig.controller.begin_multiview_selection().unwrap();

    let mode = rig.controller.select_camera(Two).unwrap();
    assert_eq!(mode, DisplayMode::SelectingMultiview { selection: Some(Two) });
    let mode = rig.controller.select_camera(Two).unwrap();
    assert_eq!(mode, DisplayMode::SelectingMultiview { selection: None });
    assert!(rig.controller.selection().is_empty());

    // Selection does not touch the session being displayed
    assert_eq!(
        rig.controller.session_snapshot().map(|s| s.layout),
        Some(SessionLayout::Single(One))
    );

    rig.controller.shutdown();
}

#[test]
fn test_selection_order_sets_panes() {
    let rig = rig();
    rig.controller.begin_multiview_selection().unwrap();
    rig.controller.select_camera(Three).unwrap();
    let mode = rig.controller.select_camera(One).unwrap();

    assert_eq!(mode, DisplayMode::Multiview(Three, One));
    assert_eq!(rig.controller.current_mode(), DisplayMode::Multiview(Three, One));
    assert!(rig.controller.selection().is_empty());
    assert!(matches!(
        rig.controller.select_camera(Two),
        Err(ControllerError::NotSelecting)
    ));

    rig.controller.shutdown();
}

#[test]
fn test_activate_camera_follows_selection_state() {
    let rig = rig();
    assert_eq!(rig.controller.activate_camera(Two).unwrap(), DisplayMode::Single(Two));

    rig.controller.begin_multiview_selection().unwrap();
    rig.controller.activate_camera(One).unwrap();
    assert_eq!(
        rig.controller.activate_camera(Two).unwrap(),
        DisplayMode::Multiview(One, Two)
    );

    rig.controller.shutdown();
}

#[test]
fn test_cancel_selection_restores_displayed_mode() {
    let rig = rig();
    rig.controller.switch_mode(DisplayMode::Single(Three)).unwrap();
    rig.controller.begin_multiview_selection().unwrap();
    rig.controller.select_camera(One).unwrap();

    rig.controller.cancel_selection().unwrap();
    assert_eq!(rig.controller.current_mode(), DisplayMode::Single(Three));
    assert!(rig.controller.selection().is_empty());
    assert_eq!(rig.stats.opens(), 1);

    rig.controller.shutdown();
}

#[test]
fn test_invalid_requests_change_nothing() {
    let rig = rig();
    rig.controller.switch_mode(DisplayMode::Single(One)).unwrap();

    assert!(matches!(
        rig.controller.switch_mode(DisplayMode::Multiview(Two, Two)),
        Err(ControllerError::InvalidSelection(_))
    ));
    assert!(matches!(
        rig.controller.switch_mode(DisplayMode::SelectingMultiview { selection: None }),
        Err(ControllerError::NotADisplayTarget(_))
    ));

    assert_eq!(rig.controller.current_mode(), DisplayMode::Single(One));
    assert_eq!(rig.stats.opens(), 1);

    rig.controller.shutdown();
}

#[test]
fn test_degraded_open_renders_black_pane() {
    let rig = rig();
    rig.factory.set_unavailable(Two, true);

    rig.controller.switch_mode(DisplayMode::Multiview(One, Two)).unwrap();
    assert_eq!(rig.controller.current_mode(), DisplayMode::Multiview(One, Two));
    assert_eq!(rig.controller.live_sessions(), 1);

    let presented = rig.sink.presented();
    let frame = rig
        .sink
        .wait_for_count(presented + 3, Duration::from_secs(2))
        .unwrap();
    assert_eq!((frame.width, frame.height), (128, 60));
    assert!(!frame.region_is_black(0, 0, 64, 60));
    assert!(frame.region_is_black(64, 0, 64, 60));

    let snapshot = rig.controller.session_snapshot().unwrap();
    assert!(snapshot.slots[0].open);
    assert!(!snapshot.slots[1].open);

    rig.controller.shutdown();
}

#[test]
fn test_all_cameras_missing_still_starts() {
    let rig = rig();
    for key in CameraKey::ALL {
        rig.factory.set_unavailable(key, true);
    }

    rig.controller.switch_mode(DisplayMode::Single(Three)).unwrap();
    assert_eq!(rig.controller.current_mode(), DisplayMode::Single(Three));

    let frame = rig.sink.wait_for_count(2, Duration::from_secs(2)).unwrap();
    assert!(frame.region_is_black(0, 0, 128, 60));

    rig.controller.shutdown();
}

#[test]
fn test_concurrent_switches_serialize() {
    for _ in 0..5 {
        let rig = Arc::new(rig());
        rig.controller.switch_mode(DisplayMode::Single(One)).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let targets = [DisplayMode::Single(Two), DisplayMode::Multiview(Three, One)];
        let handles: Vec<_> = targets
            .into_iter()
            .map(|mode| {
                let rig = rig.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    rig.controller.switch_mode(mode).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mode = rig.controller.current_mode();
        assert!(targets.contains(&mode));
        assert_session_matches_mode(&rig);
        // Sessions 2 and 3 went to the two switchers; the later one survives
        let snapshot = rig.controller.session_snapshot().unwrap();
        assert_eq!(snapshot.id, 3);
        assert_eq!(Some(snapshot.layout), mode.layout());
        assert_eq!(rig.controller.live_sessions(), 1);
        assert_eq!(rig.stats.total_live(), mode.layout().unwrap().keys().len());

        rig.controller.shutdown();
    }
}

#[test]
fn test_later_switch_wins() {
    let rig = Arc::new(rig_from(
        SyntheticFactory::new(64, 48).with_open_delay(Duration::from_millis(150)),
        fast_settings(),
    ));

    let first = {
        let rig = rig.clone();
        thread::spawn(move || rig.controller.switch_mode(DisplayMode::Multiview(Two, Three)))
    };
    // The first switch is still opening its cameras under the lock
    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    rig.controller.switch_mode(DisplayMode::Single(One)).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
    first.join().unwrap().unwrap();

    assert_eq!(rig.controller.current_mode(), DisplayMode::Single(One));
    let snapshot = rig.controller.session_snapshot().unwrap();
    assert_eq!(snapshot.id, 2);
    assert_eq!(snapshot.layout, SessionLayout::Single(One));
    assert_eq!(rig.controller.live_sessions(), 1);
    assert_eq!(rig.stats.total_live(), 1);

    rig.controller.shutdown();
}

#[test]
fn test_mode_observers_only_see_started_modes() {
    let rig = Arc::new(rig_with(SessionSettings {
        target_fps: 200,
        ..fast_settings()
    }));
    let mut rx = rig.controller.subscribe();

    let observer = {
        let rig = rig.clone();
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_millis(500);
            while Instant::now() < deadline {
                let mode = *rx.borrow_and_update();
                if mode.layout().is_some() {
                    // A published display mode always has its session running
                    let snapshot = rig.controller.session_snapshot();
                    assert!(snapshot.is_some(), "no session for {}", mode);
                }
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    for key in [One, Two, Three, One] {
        rig.controller.switch_mode(DisplayMode::Single(key)).unwrap();
        thread::sleep(Duration::from_millis(20));
    }
    observer.join().unwrap();

    rig.controller.shutdown();
}

#[test]
fn test_hung_camera_does_not_wedge_switching() {
    let rig = rig_with(SessionSettings {
        join_timeout_ms: 100,
        ..fast_settings()
    });
    rig.controller.switch_mode(DisplayMode::Single(One)).unwrap();
    assert!(rig.sink.wait_for_count(1, Duration::from_secs(2)).is_some());

    rig.factory.set_read_stall(One, Duration::from_millis(800));
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    rig.controller.switch_mode(DisplayMode::Single(Two)).unwrap();
    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(rig.controller.current_mode(), DisplayMode::Single(Two));

    // The detached loop exits once its read returns
    assert!(wait_until(Duration::from_secs(3), || rig.controller.live_sessions() == 1));
    assert!(wait_until(Duration::from_secs(1), || rig.stats.live(One) == 0));
    assert_eq!(rig.stats.live(Two), 1);

    rig.controller.shutdown();
}

#[test]
fn test_failing_camera_recovers_locally() {
    let rig = rig();
    rig.controller.switch_mode(DisplayMode::Multiview(One, Two)).unwrap();
    rig.factory.set_failing_reads(Two, true);

    assert!(wait_until(Duration::from_secs(2), || {
        rig.controller
            .session_snapshot()
            .map(|s| s.slots[1].reopens > 0)
            .unwrap_or(false)
    }));

    let snapshot = rig.controller.session_snapshot().unwrap();
    assert_eq!(snapshot.slots[0].reopens, 0);
    assert_eq!(rig.controller.current_mode(), DisplayMode::Multiview(One, Two));

    rig.factory.set_failing_reads(Two, false);
    let presented = rig.sink.presented();
    let frame = rig
        .sink
        .wait_for_count(presented + 5, Duration::from_secs(2))
        .unwrap();
    assert!(!frame.region_is_black(64, 0, 64, 60));

    rig.controller.shutdown();
}

#[test]
fn test_shutdown_releases_everything() {
    let rig = rig();
    rig.controller.switch_mode(DisplayMode::Multiview(One, Three)).unwrap();

    rig.controller.shutdown();
    assert_eq!(rig.controller.current_mode(), DisplayMode::Idle);
    assert_eq!(rig.controller.live_sessions(), 0);
    assert_eq!(rig.stats.total_live(), 0);
    assert!(rig.controller.is_shut_down());

    assert!(matches!(
        rig.controller.switch_mode(DisplayMode::Single(One)),
        Err(ControllerError::ShutDown)
    ));
    assert!(matches!(
        rig.controller.begin_multiview_selection(),
        Err(ControllerError::ShutDown)
    ));
    rig.controller.shutdown();
}
