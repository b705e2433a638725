//! Chunked file transfer over the data channel.
//!
//! The sender produces one chunk per call to [`TransferSession::next_chunk`]
//! and only produces the next one once the receiver acknowledged the
//! previous one. Chunks carry no sequence number, which relies on the data
//! channel being reliable and ordered.

use bytes::{Bytes, BytesMut};
use log::debug;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("Received more data than expected")]
    Overflow,
    #[error("transfer {0} is not sending")]
    NotSender(String),
    #[error("transfer {0} is not receiving")]
    NotReceiver(String),
    #[error("transfer {0} is already complete")]
    AlreadyComplete(String),
    #[error("chunk size must be positive")]
    InvalidChunkSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Send,
    Receive,
}

/// Outcome of a single step: the chunk moved, and the assembled file once
/// the last byte went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStep {
    pub chunk: Bytes,
    pub completed: Option<Bytes>,
}

/// Display summary of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub id: String,
    pub filename: String,
    pub progress: u8,
    pub incoming: bool,
}

#[derive(Debug)]
enum Payload {
    Source { data: Bytes, chunk_size: usize },
    Chunks(Vec<Bytes>),
}

#[derive(Debug)]
pub struct TransferSession {
    id: String,
    filename: String,
    size: u64,
    seek: u64,
    payload: Payload,
    completed: bool,
}

impl TransferSession {
    pub fn outgoing(
        filename: impl Into<String>,
        data: Bytes,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize);
        }
        Ok(Self {
            id: generate_id(),
            filename: filename.into(),
            size: data.len() as u64,
            seek: 0,
            payload: Payload::Source { data, chunk_size },
            completed: false,
        })
    }

    pub fn incoming(id: impl Into<String>, filename: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            size,
            seek: 0,
            payload: Payload::Chunks(Vec::new()),
            completed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn seek(&self) -> u64 {
        self.seek
    }

    pub fn direction(&self) -> TransferDirection {
        match self.payload {
            Payload::Source { .. } => TransferDirection::Send,
            Payload::Chunks(_) => TransferDirection::Receive,
        }
    }

    pub fn is_incoming(&self) -> bool {
        self.direction() == TransferDirection::Receive
    }

    pub fn is_done(&self) -> bool {
        self.completed
    }

    /// Percentage transferred, rounded down.
    pub fn progress(&self) -> u8 {
        if self.size == 0 {
            return 100;
        }
        (self.seek.saturating_mul(100) / self.size).min(100) as u8
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            id: self.id.clone(),
            filename: self.filename.clone(),
            progress: self.progress(),
            incoming: self.is_incoming(),
        }
    }

    /// Read the next `[seek, seek + chunk_size)` slice of the source.
    ///
    /// An empty file yields a single empty chunk so the receiver still sees
    /// the transfer complete.
    pub fn next_chunk(&mut self) -> Result<TransferStep, TransferError> {
        let Payload::Source { data, chunk_size } = &self.payload else {
            return Err(TransferError::NotSender(self.id.clone()));
        };
        if self.completed {
            return Err(TransferError::AlreadyComplete(self.id.clone()));
        }

        let start = self.seek as usize;
        let end = start.saturating_add(*chunk_size).min(data.len());
        let chunk = data.slice(start..end);
        self.seek = end as u64;

        let completed = if self.seek == self.size {
            self.completed = true;
            debug!("Transfer {} sent {} bytes", self.id, self.size);
            Some(data.clone())
        } else {
            None
        };
        Ok(TransferStep { chunk, completed })
    }

    /// Buffer a received chunk. Exceeding the announced size is an error and
    /// leaves the session untouched.
    pub fn append(&mut self, chunk: Bytes) -> Result<TransferStep, TransferError> {
        if self.completed {
            return Err(TransferError::AlreadyComplete(self.id.clone()));
        }
        let Payload::Chunks(chunks) = &mut self.payload else {
            return Err(TransferError::NotReceiver(self.id.clone()));
        };

        let seek = self.seek + chunk.len() as u64;
        if seek > self.size {
            return Err(TransferError::Overflow);
        }
        self.seek = seek;
        chunks.push(chunk.clone());

        let completed = if self.seek == self.size {
            self.completed = true;
            let mut blob = BytesMut::with_capacity(self.size as usize);
            for part in chunks.drain(..) {
                blob.extend_from_slice(&part);
            }
            debug!("Transfer {} received {} bytes", self.id, self.size);
            Some(blob.freeze())
        } else {
            None
        };
        Ok(TransferStep { chunk, completed })
    }
}

fn generate_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(data: &'static [u8], chunk_size: usize) -> TransferSession {
        TransferSession::outgoing("file.txt", Bytes::from_static(data), chunk_size).unwrap()
    }

    #[test]
    fn test_next_chunk_slices() {
        let mut transfer = sender(b"content", 3);
        let chunks: Vec<Bytes> = (0..3)
            .map(|_| transfer.next_chunk().unwrap().chunk)
            .collect();
        assert_eq!(chunks, vec!["con", "ten", "t"]);
        assert!(transfer.is_done());
        assert_eq!(transfer.progress(), 100);
    }

    #[test]
    fn test_completion_only_on_last_chunk() {
        let mut transfer = sender(b"content", 3);
        assert!(transfer.next_chunk().unwrap().completed.is_none());
        assert!(transfer.next_chunk().unwrap().completed.is_none());
        let last = transfer.next_chunk().unwrap();
        assert_eq!(last.completed, Some(Bytes::from_static(b"content")));
        assert_eq!(
            transfer.next_chunk(),
            Err(TransferError::AlreadyComplete(transfer.id().to_string()))
        );
    }

    /// Size N in chunks of C arrives whole after exactly ceil(N/C) chunks.
    #[test]
    fn test_chunk_counts() {
        let cases: [(usize, usize); 8] = [(1, 1), (6, 3), (7, 3), (8, 4), (9, 4), (3, 10), (16, 1), (100, 7)];
        for (size, chunk_size) in cases {
            let data: Bytes = (0..size).map(|i| i as u8).collect::<Vec<u8>>().into();
            let mut outgoing = TransferSession::outgoing("f", data.clone(), chunk_size).unwrap();
            let mut incoming = TransferSession::incoming(outgoing.id(), "f", size as u64);

            let mut chunks = 0;
            let received = loop {
                let step = outgoing.next_chunk().unwrap();
                chunks += 1;
                let arrived = incoming.append(step.chunk).unwrap();
                assert_eq!(arrived.completed.is_some(), step.completed.is_some());
                if let Some(blob) = arrived.completed {
                    break blob;
                }
                assert!(incoming.progress() < 100);
            };

            assert_eq!(chunks, size.div_ceil(chunk_size), "{size}/{chunk_size}");
            assert_eq!(received, data);
            assert_eq!(incoming.progress(), 100);
            assert!(incoming.is_done());
        }
    }

    #[test]
    fn test_progress_rounds_down() {
        let mut transfer = TransferSession::incoming("x", "file.txt", 7);
        transfer.append(Bytes::from_static(b"conten")).unwrap();
        assert_eq!(transfer.seek(), 6);
        assert_eq!(transfer.progress(), 85);
        assert!(!transfer.is_done());
    }

    #[test]
    fn test_receiver_assembles_blob() {
        let mut transfer = TransferSession::incoming("x", "file.txt", 7);
        for part in [&b"con"[..], b"ten"] {
            let step = transfer.append(Bytes::copy_from_slice(part)).unwrap();
            assert!(step.completed.is_none());
        }
        let step = transfer.append(Bytes::from_static(b"t")).unwrap();
        assert_eq!(step.chunk, Bytes::from_static(b"t"));
        assert_eq!(step.completed, Some(Bytes::from_static(b"content")));
        assert!(transfer.is_done());
    }

    #[test]
    fn test_receiver_overflow() {
        let mut transfer = TransferSession::incoming("x", "file.txt", 4);
        transfer.append(Bytes::from_static(b"abc")).unwrap();
        let err = transfer.append(Bytes::from_static(b"de")).unwrap_err();
        assert_eq!(err, TransferError::Overflow);
        assert_eq!(err.to_string(), "Received more data than expected");
        assert_eq!(transfer.seek(), 3);
    }

    #[test]
    fn test_direction_guards() {
        let mut outgoing = sender(b"abc", 1);
        assert!(matches!(
            outgoing.append(Bytes::from_static(b"a")),
            Err(TransferError::NotReceiver(_))
        ));
        let mut incoming = TransferSession::incoming("x", "f", 1);
        assert!(matches!(incoming.next_chunk(), Err(TransferError::NotSender(_))));
        assert!(incoming.is_incoming());
        assert!(!outgoing.is_incoming());
    }

    #[test]
    fn test_empty_file() {
        let mut outgoing = sender(b"", 4);
        let step = outgoing.next_chunk().unwrap();
        assert!(step.chunk.is_empty());
        assert_eq!(step.completed, Some(Bytes::new()));

        let mut incoming = TransferSession::incoming(outgoing.id(), "empty", 0);
        let step = incoming.append(step.chunk).unwrap();
        assert_eq!(step.completed, Some(Bytes::new()));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert_eq!(
            TransferSession::outgoing("f", Bytes::from_static(b"abc"), 0).unwrap_err(),
            TransferError::InvalidChunkSize
        );
    }

    #[test]
    fn test_summary() {
        let mut transfer = sender(b"abcd", 2);
        transfer.next_chunk().unwrap();
        let summary = transfer.summary();
        assert_eq!(summary.filename, "file.txt");
        assert_eq!(summary.progress, 50);
        assert!(!summary.incoming);
        assert_eq!(summary.id.len(), 16);
    }
}
