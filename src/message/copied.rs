//! Byte multipart - frames copied into `bytes::Bytes`.
//!
//! Frames are reference counted, so moving and cloning them is cheap, but
//! building a frame from socket data always copies once.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;

use super::{fmt_frames, Multipart};

/// Multipart message whose frames are `Bytes` values.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct ByteMultipart {
    frames: VecDeque<Bytes>,
}

impl ByteMultipart {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate over the frames, front first.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.frames.iter()
    }
}

impl Multipart for ByteMultipart {
    type Frame = Bytes;

    #[inline]
    fn frame(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    #[inline]
    fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    fn get(&self, index: usize) -> Option<&[u8]> {
        self.frames.get(index).map(|b| &b[..])
    }

    fn push_front(&mut self, frame: Bytes) {
        self.frames.push_front(frame);
    }

    fn push_back(&mut self, frame: Bytes) {
        self.frames.push_back(frame);
    }

    fn pop_front(&mut self) -> Option<Bytes> {
        self.frames.pop_front()
    }

    fn pop_back(&mut self) -> Option<Bytes> {
        self.frames.pop_back()
    }

    fn duplicate(&self) -> Self {
        Self {
            frames: self.frames.iter().map(|b| Bytes::copy_from_slice(b)).collect(),
        }
    }
}

impl From<Vec<Bytes>> for ByteMultipart {
    fn from(frames: Vec<Bytes>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl fmt::Debug for ByteMultipart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_frames("ByteMultipart", self.frames.iter().map(|b| &b[..]), f)
    }
}
