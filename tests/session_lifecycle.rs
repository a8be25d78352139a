//! Session state-machine tests over a scripted frame source and the
//! in-memory command channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dropwatch::{
    Frame, FrameSource, InMemoryChannel, Roi, RoiMask, SessionController, SessionOutcome,
    SessionParams, StreamError, StreamOpener,
};

const SIZE: u32 = 16;

/// A frame source that replays a prepared list of read results and counts
/// `close` calls into a shared counter.
struct ScriptedSource {
    reads: VecDeque<Result<Frame, StreamError>>,
    closes: Arc<AtomicU32>,
}

impl FrameSource for ScriptedSource {
    fn read(&mut self) -> Result<Frame, StreamError> {
        self.reads
            .pop_front()
            .unwrap_or_else(|| Err(StreamError::read("script exhausted")))
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opens one scripted source per session, in order.
struct ScriptedOpener {
    scripts: Arc<Mutex<VecDeque<Vec<Result<Frame, StreamError>>>>>,
    fail_open: Arc<AtomicBool>,
    closes: Arc<AtomicU32>,
}

impl StreamOpener for ScriptedOpener {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, StreamError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StreamError::unavailable("scripted open failure"));
        }
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(ScriptedSource {
            reads: script.into(),
            closes: self.closes.clone(),
        }))
    }
}

struct Rig {
    channel: InMemoryChannel,
    controller: SessionController<InMemoryChannel>,
    fail_open: Arc<AtomicBool>,
    closes: Arc<AtomicU32>,
    scripts: Arc<Mutex<VecDeque<Vec<Result<Frame, StreamError>>>>>,
}

fn rig(params: SessionParams) -> Rig {
    let channel = InMemoryChannel::new();
    let fail_open = Arc::new(AtomicBool::new(false));
    let closes = Arc::new(AtomicU32::new(0));
    let scripts = Arc::new(Mutex::new(VecDeque::new()));
    let opener = ScriptedOpener {
        scripts: scripts.clone(),
        fail_open: fail_open.clone(),
        closes: closes.clone(),
    };
    let controller =
        SessionController::new(channel.clone(), Box::new(opener), full_mask(), params);
    Rig {
        channel,
        controller,
        fail_open,
        closes,
        scripts,
    }
}

fn fast_params() -> SessionParams {
    SessionParams {
        threshold: 1_000,
        detect_frame_limit: 3,
        budget: Duration::from_secs(30),
        poll_interval: Duration::ZERO,
        idle_backoff: Duration::ZERO,
        open_backoff: Duration::ZERO,
        read_attempts: 5,
        emit_timeout_code: false,
    }
}

fn full_mask() -> RoiMask {
    Roi::new(vec![
        (0, 0),
        (SIZE as i32, 0),
        (SIZE as i32, SIZE as i32),
        (0, SIZE as i32),
    ])
    .expect("roi")
    .rasterize(SIZE, SIZE)
}

fn black() -> Frame {
    Frame::filled(SIZE, SIZE, 0)
}

fn white() -> Frame {
    Frame::filled(SIZE, SIZE, 255)
}

/// A frame pair whose score crosses any low threshold.
fn changed_pair() -> Vec<Result<Frame, StreamError>> {
    vec![Ok(black()), Ok(white())]
}

/// A frame pair scoring zero.
fn static_pair() -> Vec<Result<Frame, StreamError>> {
    vec![Ok(black()), Ok(black())]
}

fn push_script(rig: &Rig, script: Vec<Result<Frame, StreamError>>) {
    rig.scripts.lock().expect("scripts lock").push_back(script);
}

#[test]
fn detection_pushes_success_exactly_once() {
    let mut r = rig(fast_params());
    // Three over-threshold pairs plus spares that must never be read.
    let mut script = Vec::new();
    for _ in 0..5 {
        script.extend(changed_pair());
    }
    push_script(&r, script);
    r.channel.queue_command("START");

    let (outcome, stats) = r.controller.poll_once().expect("session ran");

    assert_eq!(outcome, SessionOutcome::Detected);
    assert_eq!(stats.detection_count, 3);
    assert_eq!(stats.iterations, 3);
    assert_eq!(r.channel.results(), vec!["S0"]);
    assert_eq!(r.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn cumulative_counting_does_not_require_consecutive_detections() {
    let mut r = rig(fast_params());
    let mut script = Vec::new();
    script.extend(changed_pair());
    script.extend(static_pair());
    script.extend(changed_pair());
    script.extend(static_pair());
    script.extend(changed_pair());
    push_script(&r, script);
    r.channel.queue_command("START");

    let (outcome, stats) = r.controller.poll_once().expect("session ran");

    assert_eq!(outcome, SessionOutcome::Detected);
    assert_eq!(stats.detection_count, 3);
    assert_eq!(stats.iterations, 5);
    assert_eq!(r.channel.results(), vec!["S0"]);
}

#[test]
fn stop_ends_the_session_before_the_next_read() {
    let mut r = rig(fast_params());
    push_script(&r, changed_pair());
    r.channel.queue_command("START");
    r.channel.queue_command("STOP");

    let (outcome, stats) = r.controller.poll_once().expect("session ran");

    assert_eq!(outcome, SessionOutcome::Stopped);
    assert_eq!(stats.frames_read, 0);
    assert!(r.channel.results().is_empty());
    assert_eq!(r.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn timeout_emits_nothing_by_default() {
    let mut r = rig(SessionParams {
        budget: Duration::ZERO,
        ..fast_params()
    });
    push_script(&r, changed_pair());
    r.channel.queue_command("START");

    let (outcome, stats) = r.controller.poll_once().expect("session ran");

    assert_eq!(outcome, SessionOutcome::TimedOut);
    assert_eq!(stats.frames_read, 0);
    assert!(r.channel.results().is_empty());
    assert_eq!(r.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn timeout_code_is_opt_in() {
    let mut r = rig(SessionParams {
        budget: Duration::ZERO,
        emit_timeout_code: true,
        ..fast_params()
    });
    r.channel.queue_command("START");

    let (outcome, _) = r.controller.poll_once().expect("session ran");

    assert_eq!(outcome, SessionOutcome::TimedOut);
    assert_eq!(r.channel.results(), vec!["E0"]);
}

#[test]
fn failed_open_keeps_arming_without_emitting() {
    let mut r = rig(fast_params());
    r.fail_open.store(true, Ordering::SeqCst);

    for _ in 0..3 {
        r.channel.queue_command("START");
        assert!(r.controller.poll_once().is_none());
    }
    assert!(r.channel.results().is_empty());
    assert_eq!(r.closes.load(Ordering::SeqCst), 0);

    // The controller recovers as soon as the stream comes back.
    r.fail_open.store(false, Ordering::SeqCst);
    push_script(&r, changed_pair());
    r.channel.queue_command("START");
    r.channel.queue_command("STOP");
    let (outcome, _) = r.controller.poll_once().expect("session ran");
    assert_eq!(outcome, SessionOutcome::Stopped);
}

#[test]
fn exhausted_reads_end_the_session_without_a_result() {
    let mut r = rig(fast_params());
    let script = (0..10)
        .map(|_| Err(StreamError::read("stalled")))
        .collect::<Vec<_>>();
    push_script(&r, script);
    r.channel.queue_command("START");

    let (outcome, stats) = r.controller.poll_once().expect("session ran");

    assert_eq!(outcome, SessionOutcome::StreamLost);
    assert_eq!(stats.frames_read, 0);
    assert!(r.channel.results().is_empty());
    assert_eq!(r.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn follow_up_read_failure_also_ends_the_session() {
    let mut r = rig(fast_params());
    push_script(
        &r,
        vec![Ok(black()), Err(StreamError::read("stalled mid-pair"))],
    );
    r.channel.queue_command("START");

    let (outcome, stats) = r.controller.poll_once().expect("session ran");

    assert_eq!(outcome, SessionOutcome::StreamLost);
    assert_eq!(stats.frames_read, 1);
    assert!(r.channel.results().is_empty());
}

#[test]
fn reference_read_retries_within_one_iteration() {
    let mut r = rig(fast_params());
    // Two transient failures, then a full detection run.
    let mut script: Vec<Result<Frame, StreamError>> = vec![
        Err(StreamError::read("stall 1")),
        Err(StreamError::read("stall 2")),
    ];
    for _ in 0..3 {
        script.extend(changed_pair());
    }
    push_script(&r, script);
    r.channel.queue_command("START");

    let (outcome, _) = r.controller.poll_once().expect("session ran");

    assert_eq!(outcome, SessionOutcome::Detected);
    assert_eq!(r.channel.results(), vec!["S0"]);
}

#[test]
fn geometry_mismatch_scores_zero_and_session_continues() {
    let mut r = rig(fast_params());
    // An off-geometry pair, then enough changed pairs to detect.
    let mut script: Vec<Result<Frame, StreamError>> =
        vec![Ok(Frame::filled(8, 8, 0)), Ok(Frame::filled(8, 8, 255))];
    for _ in 0..3 {
        script.extend(changed_pair());
    }
    push_script(&r, script);
    r.channel.queue_command("START");

    let (outcome, stats) = r.controller.poll_once().expect("session ran");

    assert_eq!(outcome, SessionOutcome::Detected);
    assert_eq!(stats.scoring_failures, 1);
    assert_eq!(stats.detection_count, 3);
}

#[test]
fn every_termination_path_releases_the_source_once() {
    let mut r = rig(fast_params());

    // Session 1: detection.
    let mut script = Vec::new();
    for _ in 0..3 {
        script.extend(changed_pair());
    }
    push_script(&r, script);
    // Session 2: stop command.
    push_script(&r, changed_pair());
    // Session 3: stream loss.
    push_script(&r, vec![Err(StreamError::read("gone"))]);

    r.channel.queue_command("START");
    r.controller.poll_once().expect("detected");
    r.channel.queue_command("START");
    r.channel.queue_command("STOP");
    r.controller.poll_once().expect("stopped");
    r.channel.queue_command("START");
    r.controller.poll_once().expect("stream lost");

    assert_eq!(r.closes.load(Ordering::SeqCst), 3);
    assert_eq!(r.channel.results(), vec!["S0"]);
}

#[test]
fn idle_stop_is_ignored() {
    let mut r = rig(fast_params());
    r.channel.queue_command("STOP");

    assert!(r.controller.poll_once().is_none());
    assert!(r.channel.results().is_empty());
}
