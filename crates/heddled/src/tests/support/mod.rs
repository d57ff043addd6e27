//! Test doubles shared across the daemon's unit tests.

use std::sync::Mutex;

use serde_json::Value;

use crate::reply::{ConnectionError, ReplyTransport};

/// Transport that records every frame instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<String>>,
    reject_with: Option<String>,
}

impl RecordingTransport {
    /// Builds a transport that fails every send with the given message.
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            reject_with: Some(message.into()),
        }
    }

    /// Returns the recorded frames in send order.
    pub fn frames(&self) -> Vec<String> {
        self.frames
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns the recorded frames parsed as JSON values.
    pub fn envelopes(&self) -> Vec<Value> {
        self.frames()
            .iter()
            .map(|frame| serde_json::from_str(frame).expect("recorded frame should be JSON"))
            .collect()
    }
}

impl ReplyTransport for RecordingTransport {
    fn send_frame(&self, frame: &str) -> Result<(), ConnectionError> {
        if let Some(message) = &self.reject_with {
            return Err(ConnectionError::new(message.clone()));
        }
        self.frames
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(frame.to_string());
        Ok(())
    }
}
