use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

/// Identifier of a stream entry: a millisecond timestamp and a sequence number within it.
///
/// Ids are ordered lexicographically on `(ms, seq)`, which is exactly the derived ordering
/// given the field order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    /// `0-0` is never a valid id for a new entry.
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

#[derive(Debug, ThisError, PartialEq)]
#[error("invalid stream id: {0}")]
pub struct ParseStreamIdError(String);

/// Accepts `<ms>-<seq>` and the short form `<ms>`, which means sequence 0. Auto-generated
/// ids (`*`, `<ms>-*`) are not supported.
impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseStreamIdError(s.to_string());

        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, Some(seq)),
            None => (s, None),
        };

        let ms = parse_part(ms).ok_or_else(err)?;
        let seq = match seq {
            Some(seq) => parse_part(seq).ok_or_else(err)?,
            None => 0,
        };

        Ok(Self { ms, seq })
    }
}

// `u64::from_str` tolerates a leading '+', ids don't.
fn parse_part(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StreamEntry {
    pub id: StreamId,
    /// Field/value pairs in insertion order. Repeated field names are kept as given.
    pub fields: Vec<(Bytes, Bytes)>,
}

/// An append-only sequence of entries with strictly increasing ids.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stream {
    entries: Vec<StreamEntry>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> Option<StreamId> {
        self.entries.last().map(|entry| entry.id)
    }

    /// Whether `id` may be appended next: it must not be `0-0` and must be strictly greater
    /// than the current last id.
    pub fn accepts(&self, id: StreamId) -> Result<(), AppendError> {
        if id.is_zero() {
            return Err(AppendError::ZeroId);
        }

        match self.last_id() {
            Some(last) if id <= last => Err(AppendError::NotGreaterThanLast { last }),
            _ => Ok(()),
        }
    }

    pub fn append(&mut self, id: StreamId, fields: Vec<(Bytes, Bytes)>) -> Result<(), AppendError> {
        self.accepts(id)?;
        self.entries.push(StreamEntry { id, fields });
        Ok(())
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum AppendError {
    #[error("stream id must be greater than 0-0")]
    ZeroId,
    #[error("stream id must be greater than the last id {last}")]
    NotGreaterThanLast { last: StreamId },
}
