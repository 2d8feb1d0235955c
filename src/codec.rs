use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::frame::{self, Frame};

#[derive(Debug, ThisError)]
pub enum CodecError {
    #[error("{0}")]
    Protocol(#[from] frame::Error),
    #[error("frame of at least {size} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Errors caused by what the peer sent, as opposed to the transport failing.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            CodecError::Protocol(_) | CodecError::FrameTooLarge { .. }
        )
    }
}

/// Splits a byte stream into RESP frames and writes frames back as bytes.
///
/// Frames split across reads are buffered until complete; several frames arriving in one read
/// are yielded one by one before more bytes are requested. The elements of a request array that
/// have already arrived are kept between reads, so a long array is not parsed again from its
/// first element every time more bytes come in.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    pending: Option<PendingArray>,
}

/// A top-level array whose elements have only partly arrived.
#[derive(Debug, Clone, PartialEq)]
struct PendingArray {
    length: usize,
    elements: Vec<Frame>,
    // Offset in the read buffer right after the last parsed element.
    position: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            pending: None,
        }
    }

    fn parse_array(&mut self, src: &mut Cursor<&[u8]>) -> Result<Frame, frame::Error> {
        let pending = match self.pending.as_mut() {
            Some(pending) => {
                src.set_position(pending.position as u64);
                pending
            }
            None => {
                let length = match Frame::parse_array_header(src)? {
                    Some(length) => length,
                    None => return Ok(Frame::Null),
                };
                self.pending.insert(PendingArray {
                    length,
                    // The header is untrusted, so don't let it dictate the allocation up front.
                    elements: Vec::with_capacity(length.min(64)),
                    position: src.position() as usize,
                })
            }
        };

        while pending.elements.len() < pending.length {
            let element = Frame::parse_nested(src, 1)?;
            pending.elements.push(element);
            pending.position = src.position() as usize;
        }

        let elements = std::mem::take(&mut pending.elements);
        self.pending = None;

        Ok(Frame::Array(elements))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&src[..]);
        let parsed = if self.pending.is_some() || src[0] == b'*' {
            self.parse_array(&mut cursor)
        } else {
            Frame::parse(&mut cursor)
        };

        let frame = match parsed {
            Ok(frame) => frame,
            Err(err) if err.is_incomplete() => {
                // Check if the pending frame exceeds the limit to prevent DoS attacks.
                if src.len() > self.max_frame_size {
                    self.pending = None;
                    return Err(CodecError::FrameTooLarge {
                        size: src.len(),
                        limit: self.max_frame_size,
                    });
                }
                return Ok(None);
            }
            Err(err) => {
                self.pending = None;
                return Err(err.into());
            }
        };

        // The cursor never moves past the end of the buffer, so this fits in a usize.
        let position = cursor.position() as usize;

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Ok(Some(frame))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // The peer hung up halfway through a frame; there is nobody left to reply to.
                if !buf.is_empty() {
                    debug!("Discarding {} bytes of an incomplete frame", buf.len());
                    buf.clear();
                }
                self.pending = None;
                Ok(None)
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&frame.serialize());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn command(parts: &[&'static str]) -> Frame {
        Frame::Array(
            parts
                .iter()
                .map(|part| Frame::Bulk(Bytes::from(*part)))
                .collect(),
        )
    }

    #[test]
    fn decode_split_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();

        for part in [&b"*3\r\n$3\r\nSE"[..], b"T\r\n$5\r\nmyke", b"y\r\n$7\r\nmyvalu"] {
            buf.extend_from_slice(part);
            assert!(codec.decode(&mut buf).unwrap().is_none());
        }

        buf.extend_from_slice(b"e\r\n");

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(command(&["SET", "mykey", "myvalue"]))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_pipelined_frames() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(
            &b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n*2\r\n$3\r\nGET\r\n$1"[..],
        );

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(command(&["PING"])));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(command(&["ECHO", "hi"]))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\r\nk\r\n");

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(command(&["GET", "k"]))
        );
    }

    #[test]
    fn decode_resumes_partial_array() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"*3\r\n$3\r\nSET\r\n$1\r\nk"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            codec.pending,
            Some(PendingArray {
                length: 3,
                elements: vec![Frame::Bulk(Bytes::from("SET"))],
                position: 13,
            })
        );

        buf.extend_from_slice(b"\r\n$1\r\nv");

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.pending.as_ref().map(|p| p.elements.len()), Some(2));
        assert_eq!(codec.pending.as_ref().map(|p| p.position), Some(20));

        buf.extend_from_slice(b"\r\n*1\r\n$4\r\nPING\r\n");

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(command(&["SET", "k", "v"]))
        );
        assert_eq!(codec.pending, None);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(command(&["PING"])));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_array_of_many_elements_in_small_reads() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let count = 10_000;

        buf.extend_from_slice(format!("*{}\r\n", count).as_bytes());
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        for _ in 0..count - 1 {
            buf.extend_from_slice(b"$1\r\nx\r\n");
            assert_eq!(codec.decode(&mut buf).unwrap(), None);
        }

        buf.extend_from_slice(b"$1\r\nx\r\n");

        let expected = Frame::Array(vec![Frame::Bulk(Bytes::from("x")); count]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(expected));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_null_array() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"*-1\r\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Null));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_line_too_long() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"*1\r\n$"[..]);
        buf.extend_from_slice(&vec![b'x'; 8 * 1024 * 1024]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(err.is_protocol());
        assert!(matches!(
            err,
            CodecError::Protocol(frame::Error::LineTooLong(frame::MAX_LINE_LENGTH))
        ));
        assert_eq!(codec.pending, None);
    }

    #[test]
    fn decode_malformed_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"*1\r\n$x\r\nPING\r\n"[..]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(err.is_protocol());
        assert!(matches!(
            err,
            CodecError::Protocol(frame::Error::InvalidLength { kind: "bulk" })
        ));
    }

    #[test]
    fn decode_frame_over_limit() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::from(&b"*1\r\n$100\r\n0123456789abcdef"[..]);

        let err = codec.decode(&mut buf).unwrap_err();

        assert!(matches!(
            err,
            CodecError::FrameTooLarge { size: 26, limit: 16 }
        ));
    }

    #[test]
    fn decode_eof_discards_partial_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"*1\r\n$4\r\nPI"[..]);

        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
        assert_eq!(codec.pending, None);
    }

    #[test]
    fn encode_reply() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();

        codec
            .encode(Frame::Bulk(Bytes::from("1-1")), &mut buf)
            .unwrap();
        codec.encode(Frame::Null, &mut buf).unwrap();

        assert_eq!(&buf[..], b"$3\r\n1-1\r\n$-1\r\n");
    }
}
