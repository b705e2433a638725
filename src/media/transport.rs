//! Message framing on top of the data channel.

use bytes::Bytes;
use callcore::tnetstring::{self, CodecError, FrameDecoder, Value};
use log::trace;
use std::collections::VecDeque;

/// Encodes outgoing values and decodes incoming bytes, holding frames back
/// while the channel is not open.
///
/// It performs no I/O itself: [`send`](Self::send) hands back the frame to
/// write when the channel is open, and [`open`](Self::open) hands back the
/// queued frames in order.
#[derive(Debug, Default)]
pub struct DataChannelTransport {
    open: bool,
    queue: VecDeque<Bytes>,
    decoder: FrameDecoder,
}

impl DataChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn send(&mut self, value: &Value) -> Option<Bytes> {
        let frame = tnetstring::encode(value);
        if self.open {
            trace!("--> Sending frame: {} bytes", frame.len());
            Some(frame)
        } else {
            trace!("Queueing frame until the channel opens: {} bytes", frame.len());
            self.queue.push_back(frame);
            None
        }
    }

    pub fn open(&mut self) -> Vec<Bytes> {
        self.open = true;
        self.queue.drain(..).collect()
    }

    pub fn receive(&mut self, data: &[u8]) -> Result<Vec<Value>, CodecError> {
        self.decoder.feed(data);
        let mut values = Vec::new();
        while let Some(value) = self.decoder.decode_frame()? {
            values.push(value);
        }
        Ok(values)
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    /// Forget the channel state ahead of a new connection. Queued frames are
    /// kept for the next channel.
    pub fn reset(&mut self) {
        self.open = false;
        self.decoder = FrameDecoder::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queues_until_open() {
        let mut transport = DataChannelTransport::new();
        for message in ["1st", "2nd", "3rd"] {
            assert!(transport.send(&message.into()).is_none());
        }
        assert_eq!(transport.queued(), 3);

        let flushed = transport.open();
        assert_eq!(flushed, vec!["3:1st,", "3:2nd,", "3:3rd,"]);
        assert_eq!(transport.queued(), 0);
    }

    #[test]
    fn test_sends_directly_when_open() {
        let mut transport = DataChannelTransport::new();
        transport.open();
        let frame = transport.send(&"some data".into()).unwrap();
        assert_eq!(frame, "9:some data,");
    }

    #[test]
    fn test_close_queues_again() {
        let mut transport = DataChannelTransport::new();
        transport.open();
        transport.close();
        assert!(transport.send(&Value::Null).is_none());
        assert_eq!(transport.queued(), 1);
    }

    #[test]
    fn test_receive_split_frames() {
        let mut transport = DataChannelTransport::new();
        assert!(transport.receive(b"8:some").unwrap().is_empty());
        let values = transport.receive(b"data,0:~").unwrap();
        assert_eq!(values, vec![Value::from("somedata"), Value::Null]);
    }

    #[test]
    fn test_reset_drops_partial_input() {
        let mut transport = DataChannelTransport::new();
        transport.receive(b"8:some").unwrap();
        transport.reset();
        assert_eq!(transport.receive(b"2:ok,").unwrap(), vec![Value::from("ok")]);
    }
}
