//! Detection session state machine.
//!
//! The controller idles until the command channel delivers `START`, opens a
//! fresh stream, and monitors it in a single-threaded polling loop: sample a
//! reference frame (with bounded retry), sample a follow-up frame, score the
//! pair inside the ROI, and accumulate a detection counter. The session ends
//! on `STOP`, on the detection counter reaching its limit (pushing `S0`), on
//! the session budget expiring, or on the stream going away. Every exit path
//! releases the stream exactly once.
//!
//! Lifecycle: Idle -> AwaitingStream -> Monitoring -> Terminating -> Idle.
//! Cancellation is cooperative and observed only at iteration boundaries; a
//! `STOP` issued mid-read is seen before the next read begins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::channel::{Command, CommandChannel, ResultCode};
use crate::diff;
use crate::frame::Frame;
use crate::ingest::{read_with_retry, FrameSource, StreamOpener};
use crate::roi::RoiMask;

/// Tunables for one controller. Defaults match the deployed values:
/// threshold 1.5M on the binarized-sum scale, 25 over-threshold iterations,
/// 300 s session budget, 100 ms pacing, 500 ms backoffs, 5 read attempts.
#[derive(Clone, Debug)]
pub struct SessionParams {
    /// Score a frame pair must exceed to count as a detection.
    pub threshold: u64,
    /// Detections (cumulative, not consecutive) that end the session with
    /// `S0`.
    pub detect_frame_limit: u32,
    /// Wall-clock budget of one armed session.
    pub budget: Duration,
    /// Pacing sleep between monitoring iterations.
    pub poll_interval: Duration,
    /// Sleep between idle command polls.
    pub idle_backoff: Duration,
    /// Sleep after a failed stream open, before resuming idle polling.
    pub open_backoff: Duration,
    /// Read attempts for the reference frame of each iteration.
    pub read_attempts: u32,
    /// Push `E0` when the budget expires. Off by default: the deployed
    /// behavior times out silently.
    pub emit_timeout_code: bool,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            threshold: 1_500_000,
            detect_frame_limit: 25,
            budget: Duration::from_secs(300),
            poll_interval: Duration::from_millis(100),
            idle_backoff: Duration::from_millis(500),
            open_backoff: Duration::from_millis(500),
            read_attempts: 5,
            emit_timeout_code: false,
        }
    }
}

/// How a session ended. Only `Detected` (and `TimedOut` with the opt-in
/// code) emits a result token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Detection counter reached its limit; `S0` pushed.
    Detected,
    /// `STOP` command (or process shutdown) observed.
    Stopped,
    /// Session budget expired.
    TimedOut,
    /// Frame reads exhausted their retry budget.
    StreamLost,
}

/// Counters for one session, reported to the log when it ends.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionStats {
    pub iterations: u64,
    pub frames_read: u64,
    pub detection_count: u32,
    pub scoring_failures: u32,
    pub peak_score: u64,
}

/// Closes the source when the session scope ends, whatever the exit path.
struct SourceGuard {
    source: Box<dyn FrameSource>,
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.source.close();
    }
}

pub struct SessionController<C: CommandChannel> {
    channel: C,
    opener: Box<dyn StreamOpener>,
    mask: RoiMask,
    params: SessionParams,
    shutdown: Arc<AtomicBool>,
    #[cfg(feature = "snapshot")]
    snapshots: Option<crate::snapshot::SnapshotWriter>,
}

impl<C: CommandChannel> SessionController<C> {
    pub fn new(
        channel: C,
        opener: Box<dyn StreamOpener>,
        mask: RoiMask,
        params: SessionParams,
    ) -> Self {
        Self {
            channel,
            opener,
            mask,
            params,
            shutdown: Arc::new(AtomicBool::new(false)),
            #[cfg(feature = "snapshot")]
            snapshots: None,
        }
    }

    /// Attach a debug snapshot writer (outside the detection contract).
    #[cfg(feature = "snapshot")]
    pub fn with_snapshots(mut self, snapshots: crate::snapshot::SnapshotWriter) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Flag that stops the controller. Flip it from a signal handler; the
    /// controller notices at the next iteration boundary.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Recover the channel, e.g. to disconnect it cleanly after `run`.
    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Poll forever: arm on `START`, run the session, return to polling.
    /// Session failures are logged and never end the loop.
    pub fn run(&mut self) {
        log::info!("controller idle, polling for commands");
        while !self.shutdown.load(Ordering::SeqCst) {
            self.poll_once();
            std::thread::sleep(self.params.idle_backoff);
        }
        log::info!("controller stopping on shutdown signal");
    }

    /// One idle-loop turn: consume at most one command; on `START`, run a
    /// full session to completion. Returns the session outcome if one ran.
    pub fn poll_once(&mut self) -> Option<(SessionOutcome, SessionStats)> {
        match self.poll_channel() {
            Some(Command::Start) => self.arm(),
            Some(Command::Stop) => {
                log::debug!("STOP while idle ignored");
                None
            }
            None => None,
        }
    }

    /// Non-blocking poll; channel failures count as "no command pending".
    fn poll_channel(&mut self) -> Option<Command> {
        match self.channel.poll_command() {
            Ok(command) => command,
            Err(err) => {
                log::warn!("command poll failed, treating as empty: {}", err);
                None
            }
        }
    }

    /// AwaitingStream: open the source, then monitor. A failed open emits
    /// nothing and backs off briefly so a dead camera cannot spin the loop.
    fn arm(&mut self) -> Option<(SessionOutcome, SessionStats)> {
        let source = match self.opener.open() {
            Ok(source) => source,
            Err(err) => {
                log::error!("stream open failed: {}", err);
                std::thread::sleep(self.params.open_backoff);
                return None;
            }
        };

        let mut guard = SourceGuard { source };
        let (outcome, stats) = self.monitor(guard.source.as_mut());

        if outcome == SessionOutcome::TimedOut && self.params.emit_timeout_code {
            self.emit(ResultCode::NoDrop);
        }

        log::info!(
            "session ended: {:?} after {} iterations, {} frames, {} detections (peak score {}, {} scoring failures)",
            outcome,
            stats.iterations,
            stats.frames_read,
            stats.detection_count,
            stats.peak_score,
            stats.scoring_failures
        );
        Some((outcome, stats))
        // guard drops here: the source is closed on every path
    }

    /// Monitoring: score frame pairs until a termination condition fires.
    fn monitor(&mut self, source: &mut dyn FrameSource) -> (SessionOutcome, SessionStats) {
        let armed_at = Instant::now();
        let mut stats = SessionStats::default();
        log::info!(
            "session armed: threshold={} limit={} budget={}s",
            self.params.threshold,
            self.params.detect_frame_limit,
            self.params.budget.as_secs()
        );

        loop {
            match self.poll_channel() {
                Some(Command::Stop) => return (SessionOutcome::Stopped, stats),
                // A redundant START mid-session is consumed and ignored.
                Some(Command::Start) | None => {}
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return (SessionOutcome::Stopped, stats);
            }

            std::thread::sleep(self.params.poll_interval);

            if armed_at.elapsed() >= self.params.budget {
                log::warn!(
                    "session budget of {}s expired without detection",
                    self.params.budget.as_secs()
                );
                return (SessionOutcome::TimedOut, stats);
            }

            stats.iterations += 1;

            // The reference frame is re-sampled every iteration; comparisons
            // are never chained across iterations.
            let reference = match read_with_retry(source, self.params.read_attempts) {
                Ok(frame) => frame,
                Err(err) => {
                    log::error!(
                        "no reference frame after {} attempts: {}",
                        self.params.read_attempts,
                        err
                    );
                    return (SessionOutcome::StreamLost, stats);
                }
            };
            stats.frames_read += 1;

            let follow_up = match source.read() {
                Ok(frame) => frame,
                Err(err) => {
                    log::error!("follow-up frame read failed: {}", err);
                    return (SessionOutcome::StreamLost, stats);
                }
            };
            stats.frames_read += 1;

            let score = self.score_pair(&reference, &follow_up, &mut stats);
            stats.peak_score = stats.peak_score.max(score);

            if score > self.params.threshold {
                stats.detection_count += 1;
                log::debug!(
                    "change {} over threshold ({}/{})",
                    score,
                    stats.detection_count,
                    self.params.detect_frame_limit
                );
                self.write_snapshot(&follow_up, stats.detection_count);

                if stats.detection_count >= self.params.detect_frame_limit {
                    self.emit(ResultCode::Success);
                    return (SessionOutcome::Detected, stats);
                }
            }
        }
    }

    /// Score one frame pair. A scoring failure is logged and counted but
    /// scored as zero: a missed detection is preferable to a dead session.
    fn score_pair(&mut self, reference: &Frame, follow_up: &Frame, stats: &mut SessionStats) -> u64 {
        match diff::score(reference, follow_up, &self.mask) {
            Ok(score) => score,
            Err(err) => {
                stats.scoring_failures += 1;
                log::warn!("scoring failed, treating as no change: {}", err);
                0
            }
        }
    }

    /// Push a result token. Write-once per session by construction; a
    /// failed push is logged and the session continues to termination.
    fn emit(&mut self, code: ResultCode) {
        match self.channel.push_result(code) {
            Ok(()) => log::info!("result '{}' pushed to channel", code.as_token()),
            Err(err) => log::warn!("result push failed, continuing: {}", err),
        }
    }

    #[cfg(feature = "snapshot")]
    fn write_snapshot(&self, frame: &Frame, detection_count: u32) {
        if let Some(writer) = &self.snapshots {
            match writer.write(frame, detection_count) {
                Ok(path) => log::debug!("snapshot written to {}", path.display()),
                Err(err) => log::warn!("snapshot write failed: {}", err),
            }
        }
    }

    #[cfg(not(feature = "snapshot"))]
    fn write_snapshot(&self, _frame: &Frame, _detection_count: u32) {}
}
