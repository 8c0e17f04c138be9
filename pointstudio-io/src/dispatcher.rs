//! Parse dispatcher: extension-keyed decoding off the interactive thread
//!
//! Each import is a single-shot request keyed by a unique id. The byte
//! buffer moves into the worker with the request and the decoded cloud moves
//! back with the result; nothing is copied. E57 is the one decoder pinned to
//! the calling thread, for its document parser.

use crate::{decode_bytes, requires_inline_parse};
use log::debug;
use pointstudio_core::CanonicalCloud;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};

/// Progress phases every import passes through
pub const PHASE_READING: &str = "Reading file";
pub const PHASE_PARSING: &str = "Parsing";
pub const PHASE_TRANSFER: &str = "Transferring data";
pub const PHASE_COMPLETE: &str = "Complete";

/// Messages streamed back from a parse request
#[derive(Debug)]
pub enum ParseMessage {
    Progress {
        id: u64,
        phase: &'static str,
        percent: u8,
    },
    Result {
        id: u64,
        cloud: Box<CanonicalCloud>,
    },
    Error {
        id: u64,
        message: String,
    },
}

impl ParseMessage {
    pub fn id(&self) -> u64 {
        match self {
            ParseMessage::Progress { id, .. }
            | ParseMessage::Result { id, .. }
            | ParseMessage::Error { id, .. } => *id,
        }
    }
}

/// Hands parse jobs to worker threads and streams results back
pub struct ParseDispatcher {
    sender: Sender<ParseMessage>,
    next_id: AtomicU64,
}

impl ParseDispatcher {
    pub fn new() -> (Self, Receiver<ParseMessage>) {
        let (sender, receiver) = channel();
        (
            Self {
                sender,
                next_id: AtomicU64::new(1),
            },
            receiver,
        )
    }

    /// Submit a buffer for decoding; returns the request id.
    ///
    /// The buffer is moved, not cloned. Most formats decode on a spawned
    /// worker; E57 decodes synchronously on the calling thread before this
    /// returns.
    pub fn submit(&self, extension: &str, bytes: Vec<u8>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let extension = extension.to_lowercase();
        let sender = self.sender.clone();

        if requires_inline_parse(&extension) {
            run_parse(id, &extension, bytes, &sender);
            return id;
        }

        std::thread::spawn(move || {
            debug!("parse worker {} started for .{}", id, extension);
            run_parse(id, &extension, bytes, &sender);
        });
        id
    }
}

fn run_parse(id: u64, extension: &str, bytes: Vec<u8>, sender: &Sender<ParseMessage>) {
    let progress = |phase: &'static str, percent: u8| {
        let _ = sender.send(ParseMessage::Progress { id, phase, percent });
    };

    progress(PHASE_READING, 5);
    progress(PHASE_PARSING, 20);

    match decode_bytes(extension, &bytes) {
        Ok(cloud) => {
            progress(PHASE_TRANSFER, 90);
            progress(PHASE_COMPLETE, 100);
            let _ = sender.send(ParseMessage::Result {
                id,
                cloud: Box::new(cloud),
            });
        }
        Err(e) => {
            let _ = sender.send(ParseMessage::Error {
                id,
                message: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_request_round_trip() {
        let (dispatcher, receiver) = ParseDispatcher::new();
        let id = dispatcher.submit("xyz", b"0 0 0\n1 1 1\n".to_vec());

        let mut phases = Vec::new();
        loop {
            let msg = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(msg.id(), id);
            match msg {
                ParseMessage::Progress { phase, .. } => phases.push(phase),
                ParseMessage::Result { cloud, .. } => {
                    assert_eq!(cloud.point_count(), 2);
                    break;
                }
                ParseMessage::Error { message, .. } => panic!("unexpected error: {}", message),
            }
        }
        assert!(phases.contains(&PHASE_READING));
        assert!(phases.contains(&PHASE_COMPLETE));
    }

    #[test]
    fn test_concurrent_requests_complete_independently() {
        let (dispatcher, receiver) = ParseDispatcher::new();
        let a = dispatcher.submit("xyz", b"0 0 0\n".to_vec());
        let b = dispatcher.submit("pts", b"1\n1 1 1\n".to_vec());

        let mut done = std::collections::HashSet::new();
        while done.len() < 2 {
            match receiver.recv_timeout(Duration::from_secs(5)).unwrap() {
                ParseMessage::Result { id, .. } => {
                    done.insert(id);
                }
                ParseMessage::Error { message, .. } => panic!("unexpected error: {}", message),
                _ => {}
            }
        }
        assert!(done.contains(&a) && done.contains(&b));
    }

    #[test]
    fn test_error_surface() {
        let (dispatcher, receiver) = ParseDispatcher::new();
        let id = dispatcher.submit("rcp", vec![]);
        loop {
            match receiver.recv_timeout(Duration::from_secs(5)).unwrap() {
                ParseMessage::Error { id: got, message } => {
                    assert_eq!(got, id);
                    assert!(message.contains("convert"));
                    break;
                }
                ParseMessage::Result { .. } => panic!("expected an error"),
                _ => {}
            }
        }
    }
}
