//! Blocking human input that still honours the stop signal.

use std::io::BufRead;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::stop::StopSignal;

/// Text a front door sends to request a stop through the input channel.
pub const STOP_SENTINEL: &str = "__STOP_REQUESTED__";

/// What a human-input wait ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputReply {
    Text(String),
    Stop,
    /// The wait was abandoned without an answer.
    Cancelled,
}

pub trait HumanInput {
    fn request_input(&self, prompt: &str, stop: &StopSignal) -> InputReply;
}

/// Message accepted by [`ChannelInput`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMessage {
    Text(String),
    Cancel,
}

/// Input fed through a channel, polled so a stop request is noticed while
/// waiting. A closed channel counts as a cancel.
#[derive(Debug)]
pub struct ChannelInput {
    rx: Mutex<Receiver<InputMessage>>,
    poll: Duration,
}

impl ChannelInput {
    pub fn new(poll: Duration) -> (Sender<InputMessage>, Self) {
        let (tx, rx) = mpsc::channel();
        (
            tx,
            Self {
                rx: Mutex::new(rx),
                poll,
            },
        )
    }
}

impl HumanInput for ChannelInput {
    fn request_input(&self, prompt: &str, stop: &StopSignal) -> InputReply {
        debug!(prompt, "waiting for human input");
        let Ok(rx) = self.rx.lock() else {
            warn!("input channel lock poisoned");
            return InputReply::Cancelled;
        };
        loop {
            if stop.is_stopped() {
                return InputReply::Stop;
            }
            match rx.recv_timeout(self.poll) {
                Ok(InputMessage::Text(text)) if text.trim() == STOP_SENTINEL => {
                    stop.request_stop();
                    return InputReply::Stop;
                }
                Ok(InputMessage::Text(text)) => return InputReply::Text(text),
                Ok(InputMessage::Cancel) => return InputReply::Cancelled,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return InputReply::Cancelled,
            }
        }
    }
}

/// Terminal input: lines from stdin, prompt on stderr. End of input cancels.
#[derive(Debug)]
pub struct StdinInput {
    inner: ChannelInput,
}

impl StdinInput {
    /// Start the background stdin reader.
    pub fn spawn(poll: Duration) -> Self {
        let (tx, inner) = ChannelInput::new(poll);
        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(InputMessage::Text(line)).is_err() {
                    break;
                }
            }
        });
        Self { inner }
    }
}

impl HumanInput for StdinInput {
    fn request_input(&self, prompt: &str, stop: &StopSignal) -> InputReply {
        eprintln!("{prompt}");
        self.inner.request_input(prompt, stop)
    }
}
