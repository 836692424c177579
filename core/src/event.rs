//! Session events surfaced to the host control surface.

use std::sync::mpsc::Sender;

use crate::packet::FileMetadata;
use crate::receiver::IntegrityStatus;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    CalibrationDone { carriers: Vec<f32> },
    ChunkSent { index: u32, total: u32 },
    ChunkReceived { index: u32 },
    TransferDone {
        metadata: FileMetadata,
        integrity: IntegrityStatus,
    },
    Error { kind: String, message: String },
}

/// Best-effort event delivery; a disconnected host never fails a session.
pub(crate) fn emit(events: &Option<Sender<SessionEvent>>, event: SessionEvent) {
    if let Some(sender) = events {
        let _ = sender.send(event);
    }
}
