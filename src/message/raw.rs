//! Raw multipart - frames as libzmq-owned buffers.
//!
//! Frames received from a socket are kept as `zmq::Message` and moved
//! between messages without copying. Only `duplicate` and `frame` copy.

use std::collections::VecDeque;
use std::fmt;

use super::{fmt_frames, Multipart};

/// Multipart message whose frames are `zmq::Message` values.
#[derive(Default)]
pub struct RawMultipart {
    frames: VecDeque<zmq::Message>,
}

impl RawMultipart {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap frames received from a socket.
    pub fn from_messages(frames: VecDeque<zmq::Message>) -> Self {
        Self { frames }
    }

    /// Hand the frames back for sending.
    pub fn into_messages(self) -> VecDeque<zmq::Message> {
        self.frames
    }
}

impl Multipart for RawMultipart {
    type Frame = zmq::Message;

    #[inline]
    fn frame(data: &[u8]) -> zmq::Message {
        zmq::Message::from(data)
    }

    #[inline]
    fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    fn get(&self, index: usize) -> Option<&[u8]> {
        self.frames.get(index).map(|m| &m[..])
    }

    fn push_front(&mut self, frame: zmq::Message) {
        self.frames.push_front(frame);
    }

    fn push_back(&mut self, frame: zmq::Message) {
        self.frames.push_back(frame);
    }

    fn pop_front(&mut self) -> Option<zmq::Message> {
        self.frames.pop_front()
    }

    fn pop_back(&mut self) -> Option<zmq::Message> {
        self.frames.pop_back()
    }

    fn duplicate(&self) -> Self {
        Self {
            frames: self.frames.iter().map(|m| zmq::Message::from(&m[..])).collect(),
        }
    }
}

impl fmt::Debug for RawMultipart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_frames("RawMultipart", self.frames.iter().map(|m| &m[..]), f)
    }
}
