// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io::Cursor;
use std::str;

use bytes::Buf;
use bytes::Bytes;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Largest bulk payload accepted, same as the default `proto-max-bulk-len` of Redis.
pub const MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;

/// Largest number of elements accepted in a single array.
pub const MAX_ARRAY_LENGTH: usize = 1024 * 1024;

/// Longest header, simple string or simple error line accepted, same as the inline limit of
/// Redis.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Arrays nested deeper than this are rejected instead of recursed into.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type: {0:#04x}")]
    InvalidDataType(u8),
    #[error("unsupported frame data type: '{0}'")]
    UnsupportedDataType(char),
    #[error("invalid {kind} length")]
    InvalidLength { kind: &'static str },
    #[error("{kind} length {length} exceeds the limit of {limit}")]
    LengthExceedsLimit {
        kind: &'static str,
        length: usize,
        limit: usize,
    },
    #[error("line exceeds {0} bytes without CRLF")]
    LineTooLong(usize),
    #[error("expected CRLF after bulk payload")]
    MissingTerminator,
    #[error("arrays nested deeper than {0} levels")]
    NestingTooDeep(usize),
    #[error("invalid integer")]
    InvalidInteger,
    #[error("invalid frame format; line is not valid UTF-8")]
    InvalidEncoding,
}

impl Error {
    /// `Incomplete` only means the buffer ends mid-frame; every other variant is a protocol
    /// violation.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    /// Parses one frame starting at the cursor position, leaving the cursor right after it.
    ///
    /// Returns `Error::Incomplete` when the buffer ends before the frame does. Nothing is
    /// consumed from the underlying buffer, so the caller can retry from the same position
    /// once more bytes arrive.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_nested(src, 0)
    }

    /// Reads an array header, `*<length>\r\n`, leaving the cursor on the first element. `None`
    /// is the null array.
    pub fn parse_array_header(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
        match get_byte(src)? {
            b'*' => get_length(src, "array", MAX_ARRAY_LENGTH),
            byte => Err(Error::InvalidDataType(byte)),
        }
    }

    /// Parses a frame found `depth` arrays deep.
    pub fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => Ok(Frame::Simple(get_line_string(src)?)),
            DataType::SimpleError => Ok(Frame::Error(get_line_string(src)?)),
            DataType::Integer => {
                let line = get_line(src)?;
                let integer = str::from_utf8(line)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or(Error::InvalidInteger)?;

                Ok(Frame::Integer(integer))
            }
            // $<length>\r\n<data>\r\n
            DataType::BulkString => match get_length(src, "bulk", MAX_BULK_LENGTH)? {
                Some(length) => {
                    let data = get_payload(src, length)?;
                    Ok(Frame::Bulk(Bytes::copy_from_slice(data)))
                }
                None => Ok(Frame::Null),
            },
            // !<length>\r\n<error>\r\n
            DataType::BulkError => match get_length(src, "bulk", MAX_BULK_LENGTH)? {
                Some(length) => {
                    let msg = get_payload(src, length)?;
                    let msg = str::from_utf8(msg).map_err(|_| Error::InvalidEncoding)?;
                    Ok(Frame::Error(msg.to_string()))
                }
                // NOTE: the protocol does not specify a way to represent a null bulk error
                None => Ok(Frame::Null),
            },
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => {
                let length = match get_length(src, "array", MAX_ARRAY_LENGTH)? {
                    Some(length) => length,
                    None => return Ok(Frame::Null),
                };

                if depth >= MAX_DEPTH {
                    return Err(Error::NestingTooDeep(MAX_DEPTH));
                }

                // The header is untrusted, so don't let it dictate the allocation up front.
                let mut frames = Vec::with_capacity(length.min(64));
                for _ in 0..length {
                    let frame = Self::parse_nested(src, depth + 1)?;
                    frames.push(frame);
                }

                Ok(Frame::Array(frames))
            }
            DataType::Null => {
                // Advance the cursor to the end of the frame.
                let _ = get_line(src)?;

                Ok(Frame::Null)
            }
            _ => Err(Error::UnsupportedDataType(char::from(first_byte))),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Frame::Simple(s) => serialize_line(DataType::SimpleString, s),
            Frame::Error(s) => serialize_line(DataType::SimpleError, s),
            Frame::Integer(i) => {
                let digits = i.to_string();
                let mut bytes = Vec::with_capacity(1 + digits.len() + CRLF.len());
                bytes.push(u8::from(DataType::Integer));
                bytes.extend_from_slice(digits.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Frame::Bulk(bytes) => {
                // The prefix is the payload's byte length, never a character count.
                let length_str = bytes.len().to_string();
                let mut result = Vec::with_capacity(
                    1 + length_str.len() + CRLF.len() + bytes.len() + CRLF.len(),
                );
                result.push(u8::from(DataType::BulkString));
                result.extend_from_slice(length_str.as_bytes());
                result.extend_from_slice(CRLF);
                result.extend_from_slice(bytes);
                result.extend_from_slice(CRLF);
                result
            }
            // Replies always use the RESP2 null bulk string, which every client understands.
            Frame::Null => b"$-1\r\n".to_vec(),
            Frame::Array(arr) => {
                let length_str = arr.len().to_string();
                let mut bytes = Vec::with_capacity(1 + length_str.len() + CRLF.len());
                bytes.push(u8::from(DataType::Array));
                bytes.extend_from_slice(length_str.as_bytes());
                bytes.extend_from_slice(CRLF);
                for frame in arr {
                    bytes.extend(frame.serialize());
                }
                bytes
            }
        }
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
        }
    }
}

/// Simple strings and errors are CRLF terminated, so a CR or LF inside them would end the
/// line early. They are replaced with spaces.
fn serialize_line(data_type: DataType, line: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + line.len() + CRLF.len());
    bytes.push(u8::from(data_type));
    bytes.extend(line.bytes().map(|b| match b {
        b'\r' | b'\n' => b' ',
        b => b,
    }));
    bytes.extend_from_slice(CRLF);
    bytes
}

/// Returns the bytes up to the next CRLF and moves the cursor past it. Only used for the
/// line-oriented parts of the protocol; bulk payloads are read by length.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    // The CRLF itself may start at most MAX_LINE_LENGTH bytes in.
    let window = &buf[start..buf.len().min(start + MAX_LINE_LENGTH + CRLF.len())];
    let end = match window.windows(2).position(|pair| pair == CRLF) {
        Some(index) => start + index,
        None if window.len() == MAX_LINE_LENGTH + CRLF.len() => {
            return Err(Error::LineTooLong(MAX_LINE_LENGTH))
        }
        None => return Err(Error::Incomplete),
    };

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

fn get_line_string(src: &mut Cursor<&[u8]>) -> Result<String, Error> {
    let line = get_line(src)?;
    str::from_utf8(line)
        .map(|s| s.to_string())
        .map_err(|_| Error::InvalidEncoding)
}

/// Parses a length header. `-1` is the null marker and yields `None`.
fn get_length(
    src: &mut Cursor<&[u8]>,
    kind: &'static str,
    limit: usize,
) -> Result<Option<usize>, Error> {
    let line = get_line(src)?;
    let length = str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(Error::InvalidLength { kind })?;

    if length == -1 {
        return Ok(None);
    }

    let length = usize::try_from(length).map_err(|_| Error::InvalidLength { kind })?;
    if length > limit {
        return Err(Error::LengthExceedsLimit {
            kind,
            length,
            limit,
        });
    }

    Ok(Some(length))
}

/// Reads exactly `length` payload bytes followed by CRLF. The payload itself may contain any
/// byte, delimiters included.
fn get_payload<'a>(src: &mut Cursor<&'a [u8]>, length: usize) -> Result<&'a [u8], Error> {
    if src.remaining() < length + CRLF.len() {
        return Err(Error::Incomplete);
    }

    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();
    let end = start + length;

    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(Error::MissingTerminator);
    }

    src.set_position((end + CRLF.len()) as u64);

    Ok(&buf[start..end])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug)]
enum DataType {
    SimpleString,   // '+'
    BulkString,     // '$'
    VerbatimString, // '='
    SimpleError,    // '-'
    BulkError,      // '!'
    Boolean,        // '#'
    Integer,        // ':'
    Double,         // ','
    BigNumber,      // '('
    Array,          // '*'
    Map,            // '%'
    Set,            // '~'
    Push,           // '>'
    // Due to historical reasons, RESP2 features two specially crafted values for representing null
    // values of bulk strings and arrays. This duality has always been a redundancy that added zero
    // semantical value to the protocol itself. The null type, introduced in RESP3, aims to fix
    // this wrong.
    Null, // '_'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'!' => Ok(Self::BulkError),
            b'*' => Ok(Self::Array),
            b'_' => Ok(Self::Null),
            b'#' => Ok(Self::Boolean),
            b',' => Ok(Self::Double),
            b'(' => Ok(Self::BigNumber),
            b'=' => Ok(Self::VerbatimString),
            b'%' => Ok(Self::Map),
            b'~' => Ok(Self::Set),
            b'>' => Ok(Self::Push),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::BulkError => b'!',
            DataType::Array => b'*',
            DataType::Null => b'_',
            DataType::Boolean => b'#',
            DataType::Double => b',',
            DataType::BigNumber => b'(',
            DataType::VerbatimString => b'=',
            DataType::Map => b'%',
            DataType::Set => b'~',
            DataType::Push => b'>',
        }
    }
}
