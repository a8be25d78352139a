//! Command/result tokens and the command-channel seam.
//!
//! The session controller is driven entirely through this interface: it
//! polls for control commands and pushes a single result token per session.
//! The trait is injected into the controller so tests can substitute the
//! in-memory channel for the MQTT transport.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Inbound control command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

impl Command {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "START" => Some(Command::Start),
            "STOP" => Some(Command::Stop),
            _ => None,
        }
    }
}

/// Decode one inbound token; unknown tokens are consumed and ignored.
pub(crate) fn decode_token(token: &str) -> Option<Command> {
    let command = Command::parse(token);
    if command.is_none() {
        log::warn!("ignoring unknown command token '{}'", token);
    }
    command
}

/// Outbound session outcome token.
///
/// Only `Success` (and `NoDrop`, when timeout emission is configured) is
/// ever pushed by the controller; the remaining codes are reserved for the
/// failure classes of the error taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    /// `S0` - sustained change detected.
    Success,
    /// `E0` - session ended without a detection.
    NoDrop,
    /// `E1` - reserved: stream could not be opened.
    StreamFault,
    /// `E2` - reserved: frame reads exhausted.
    ReadFault,
    /// `E3` - reserved: scoring failure.
    ScoreFault,
    /// `E4` - reserved: command-channel failure.
    ChannelFault,
}

impl ResultCode {
    pub fn as_token(self) -> &'static str {
        match self {
            ResultCode::Success => "S0",
            ResultCode::NoDrop => "E0",
            ResultCode::StreamFault => "E1",
            ResultCode::ReadFault => "E2",
            ResultCode::ScoreFault => "E3",
            ResultCode::ChannelFault => "E4",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Command-channel failure. Never fatal: a failed poll is treated as "no
/// command pending" and a failed push is logged and dropped.
#[derive(Clone, Debug)]
pub struct ChannelError {
    message: String,
}

impl ChannelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command channel failure: {}", self.message)
    }
}

impl std::error::Error for ChannelError {}

/// Duplex command channel: pop commands, push result codes.
pub trait CommandChannel {
    /// Non-blocking poll. An empty channel is `Ok(None)`, not an error.
    /// At most one queued token is consumed per call.
    fn poll_command(&mut self) -> Result<Option<Command>, ChannelError>;

    /// Push one result token toward the operator.
    fn push_result(&mut self, code: ResultCode) -> Result<(), ChannelError>;
}

// ----------------------------------------------------------------------------
// In-memory channel (tests, local runs)
// ----------------------------------------------------------------------------

/// FIFO channel backed by process memory. Clones share the same queues, so
/// a test can keep a handle while the controller owns another.
#[derive(Clone, Default)]
pub struct InMemoryChannel {
    inner: Arc<Mutex<InMemoryQueues>>,
}

#[derive(Default)]
struct InMemoryQueues {
    commands: VecDeque<String>,
    results: Vec<String>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw command token as an operator would.
    pub fn queue_command(&self, token: &str) {
        if let Ok(mut queues) = self.inner.lock() {
            queues.commands.push_back(token.to_string());
        }
    }

    /// All result tokens pushed so far, oldest first.
    pub fn results(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|queues| queues.results.clone())
            .unwrap_or_default()
    }
}

impl CommandChannel for InMemoryChannel {
    fn poll_command(&mut self) -> Result<Option<Command>, ChannelError> {
        let mut queues = self
            .inner
            .lock()
            .map_err(|_| ChannelError::new("in-memory channel lock poisoned"))?;
        match queues.commands.pop_front() {
            Some(token) => Ok(decode_token(&token)),
            None => Ok(None),
        }
    }

    fn push_result(&mut self, code: ResultCode) -> Result<(), ChannelError> {
        let mut queues = self
            .inner
            .lock()
            .map_err(|_| ChannelError::new("in-memory channel lock poisoned"))?;
        queues.results.push(code.as_token().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_fifo_and_consumed_once() {
        let channel = InMemoryChannel::new();
        channel.queue_command("START");
        channel.queue_command("STOP");

        let mut consumer = channel.clone();
        assert_eq!(consumer.poll_command().unwrap(), Some(Command::Start));
        assert_eq!(consumer.poll_command().unwrap(), Some(Command::Stop));
        assert_eq!(consumer.poll_command().unwrap(), None);
    }

    #[test]
    fn unknown_tokens_are_consumed_and_ignored() {
        let channel = InMemoryChannel::new();
        channel.queue_command("RESTART");
        channel.queue_command("START");

        let mut consumer = channel.clone();
        assert_eq!(consumer.poll_command().unwrap(), None);
        assert_eq!(consumer.poll_command().unwrap(), Some(Command::Start));
    }

    #[test]
    fn results_record_in_push_order() {
        let channel = InMemoryChannel::new();
        let mut producer = channel.clone();
        producer.push_result(ResultCode::Success).unwrap();
        producer.push_result(ResultCode::NoDrop).unwrap();

        assert_eq!(channel.results(), vec!["S0", "E0"]);
    }

    #[test]
    fn result_tokens_match_wire_format() {
        assert_eq!(ResultCode::Success.as_token(), "S0");
        assert_eq!(ResultCode::NoDrop.as_token(), "E0");
        assert_eq!(ResultCode::ChannelFault.as_token(), "E4");
    }
}
