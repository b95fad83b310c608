//! Message module - multipart frame containers.
//!
//! A multipart message is an ordered list of opaque byte frames. The protocol
//! code only ever talks to the [`Multipart`] trait; two backends exist:
//!
//! - [`RawMultipart`] - frames are `zmq::Message` buffers owned by libzmq
//!   (no copy between socket and protocol code)
//! - [`ByteMultipart`] - frames are copied into `bytes::Bytes`
//!
//! The backend is picked by the transport through `Transport::Message`.
//!
//! # Envelopes
//!
//! Routing through an intermediary records the return path as an address
//! frame followed by an empty delimiter frame:
//!
//! ```
//! use majordomo::message::{ByteMultipart, Multipart};
//!
//! let mut msg = ByteMultipart::from_frames(["hello"]);
//! msg.wrap(ByteMultipart::frame(b"client-1"));
//! assert_eq!(msg.to_vecs(), vec![b"client-1".to_vec(), vec![], b"hello".to_vec()]);
//!
//! let address = msg.unwrap_address().unwrap();
//! assert_eq!(&address[..], b"client-1");
//! assert_eq!(msg.to_vecs(), vec![b"hello".to_vec()]);
//! ```

use std::fmt;
use std::ops::Deref;

mod copied;
mod raw;

pub use copied::ByteMultipart;
pub use raw::RawMultipart;

/// Ordered list of frames with push/pop at both ends.
pub trait Multipart: Default + fmt::Debug + Send + Sized {
    /// A single frame.
    type Frame: Deref<Target = [u8]> + Send;

    /// Build a frame holding a copy of `data`.
    fn frame(data: &[u8]) -> Self::Frame;

    /// Number of frames.
    fn len(&self) -> usize;

    /// Frame at `index`, front first.
    fn get(&self, index: usize) -> Option<&[u8]>;

    /// Add a frame at the front.
    fn push_front(&mut self, frame: Self::Frame);

    /// Add a frame at the back.
    fn push_back(&mut self, frame: Self::Frame);

    /// Remove and return the first frame.
    fn pop_front(&mut self) -> Option<Self::Frame>;

    /// Remove and return the last frame.
    fn pop_back(&mut self) -> Option<Self::Frame>;

    /// Deep copy of every frame.
    fn duplicate(&self) -> Self;

    /// Returns true if there are no frames.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First frame.
    fn first(&self) -> Option<&[u8]> {
        self.get(0)
    }

    /// Last frame.
    fn last(&self) -> Option<&[u8]> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// Copy `data` into a new frame at the front.
    fn push_front_bytes(&mut self, data: &[u8]) {
        self.push_front(Self::frame(data));
    }

    /// Copy `data` into a new frame at the back.
    fn push_back_bytes(&mut self, data: &[u8]) {
        self.push_back(Self::frame(data));
    }

    /// Prepend `address` and an empty delimiter frame.
    fn wrap(&mut self, address: Self::Frame) {
        self.push_front(Self::frame(b""));
        self.push_front(address);
    }

    /// Remove the leading address and, if present, the empty delimiter after it.
    fn unwrap_address(&mut self) -> Option<Self::Frame> {
        let address = self.pop_front()?;
        if self.first().is_some_and(<[u8]>::is_empty) {
            self.pop_front();
        }
        Some(address)
    }

    /// Build a message from frames, front first.
    fn from_frames<I, F>(frames: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        let mut msg = Self::default();
        for frame in frames {
            msg.push_back_bytes(frame.as_ref());
        }
        msg
    }

    /// Copy every frame out into owned vectors.
    fn to_vecs(&self) -> Vec<Vec<u8>> {
        (0..self.len())
            .filter_map(|i| self.get(i))
            .map(<[u8]>::to_vec)
            .collect()
    }
}

/// Shared `Debug` rendering: frame count, then each frame as text when
/// printable and as hex otherwise.
pub(crate) fn fmt_frames<'a>(
    name: &str,
    frames: impl ExactSizeIterator<Item = &'a [u8]>,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    write!(f, "{} ({} frames)", name, frames.len())?;
    for (index, frame) in frames.enumerate() {
        match std::str::from_utf8(frame) {
            Ok(text) if !text.chars().any(char::is_control) => {
                write!(f, " [{}: {:?}]", index, text)?
            }
            _ => write!(f, " [{}: 0x{}]", index, hex::encode_upper(frame))?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_round_trip<M: Multipart>() {
        let mut msg = M::from_frames(["body-1", "body-2"]);
        msg.wrap(M::frame(b"\x00\x6b\x8b\x45\x67"));
        assert_eq!(msg.len(), 4);
        assert_eq!(msg.get(1), Some(&b""[..]));

        let address = msg.unwrap_address().unwrap();
        assert_eq!(&address[..], b"\x00\x6b\x8b\x45\x67");
        assert_eq!(msg.to_vecs(), vec![b"body-1".to_vec(), b"body-2".to_vec()]);
    }

    fn unwrap_without_delimiter<M: Multipart>() {
        let mut msg = M::from_frames(["address", "body"]);
        let address = msg.unwrap_address().unwrap();
        assert_eq!(&address[..], b"address");
        assert_eq!(msg.to_vecs(), vec![b"body".to_vec()]);

        let mut empty = M::default();
        assert!(empty.unwrap_address().is_none());
    }

    fn both_ends<M: Multipart>() {
        let mut msg = M::default();
        assert!(msg.is_empty());
        msg.push_back_bytes(b"b");
        msg.push_front_bytes(b"a");
        msg.push_back_bytes(b"c");
        assert_eq!(msg.first(), Some(&b"a"[..]));
        assert_eq!(msg.last(), Some(&b"c"[..]));
        assert_eq!(&msg.pop_back().unwrap()[..], b"c");
        assert_eq!(&msg.pop_front().unwrap()[..], b"a");
        assert_eq!(msg.len(), 1);
    }

    fn duplicate_is_independent<M: Multipart>() {
        let original = M::from_frames(["foo", "bar"]);
        let mut copy = original.duplicate();
        assert_eq!(copy.to_vecs(), original.to_vecs());

        copy.pop_front();
        assert_eq!(original.len(), 2);
        assert_eq!(copy.len(), 1);
    }

    #[test]
    fn test_raw_envelope_round_trip() {
        envelope_round_trip::<RawMultipart>();
        unwrap_without_delimiter::<RawMultipart>();
    }

    #[test]
    fn test_bytes_envelope_round_trip() {
        envelope_round_trip::<ByteMultipart>();
        unwrap_without_delimiter::<ByteMultipart>();
    }

    #[test]
    fn test_push_pop_both_ends() {
        both_ends::<RawMultipart>();
        both_ends::<ByteMultipart>();
    }

    #[test]
    fn test_duplicate() {
        duplicate_is_independent::<RawMultipart>();
        duplicate_is_independent::<ByteMultipart>();
    }

    #[test]
    fn test_debug_rendering() {
        let msg = ByteMultipart::from_frames([&b"echo"[..], &b"\x01"[..]]);
        let text = format!("{:?}", msg);
        assert!(text.starts_with("ByteMultipart (2 frames)"));
        assert!(text.contains("\"echo\""));
        assert!(text.contains("0x01"));
    }
}
