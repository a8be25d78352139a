//! dropwatch - ROI drop-detection sentinel
//!
//! This crate watches a video feed for a sustained visual change inside a
//! fixed region of interest (an object drop) and reports the outcome over an
//! external command/response channel. A remote operator arms the detector
//! with `START`, disarms it with `STOP`, and receives a short status token
//! (`S0` on detection) when the bounded detection session ends.
//!
//! # Module Structure
//!
//! - `roi`: region-of-interest polygon and its rasterized pixel mask
//! - `frame`: dense RGB frame container
//! - `ingest`: frame sources (RTSP, local devices, synthetic stubs) and the
//!   bounded read-retry combinator
//! - `diff`: ROI-masked frame-difference scoring
//! - `channel`: command/result tokens and the command-channel seam
//! - `transport`: MQTT implementation of the command channel
//! - `session`: the detection session state machine
//! - `config`: layered configuration (JSON file + environment overrides)

pub mod channel;
pub mod config;
pub mod diff;
pub mod frame;
pub mod ingest;
pub mod roi;
pub mod session;
#[cfg(feature = "snapshot")]
pub mod snapshot;
pub mod transport;

pub use channel::{ChannelError, Command, CommandChannel, InMemoryChannel, ResultCode};
pub use config::{DropwatchConfig, MqttSettings};
pub use diff::{score, ScoreError, PIXEL_DELTA};
pub use frame::Frame;
pub use ingest::{
    read_with_retry, FrameSource, RtspConfig, RtspOpener, RtspSource, SourceDescriptor,
    StreamError, StreamOpener,
};
pub use roi::{Roi, RoiMask};
pub use session::{SessionController, SessionOutcome, SessionParams, SessionStats};
#[cfg(feature = "snapshot")]
pub use snapshot::SnapshotWriter;
pub use transport::MqttChannel;
