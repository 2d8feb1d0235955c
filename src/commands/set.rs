use bytes::Bytes;
use tokio::time::Duration;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::{Store, StoreError};

/// Set `key` to hold the string `value`. If `key` already holds a value, it is overwritten,
/// regardless of its type. Any previous time to live associated with the key is discarded.
///
/// Options:
/// * `EX seconds` -- Set the specified expire time, in seconds.
/// * `PX milliseconds` -- Set the specified expire time, in milliseconds.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: String,
    pub value: Bytes,
    pub ttl: Option<Ttl>,
}

#[derive(Debug, PartialEq)]
pub enum Ttl {
    Ex(u64),
    Px(u64),
}

impl Ttl {
    pub fn duration(&self) -> Duration {
        match self {
            Ttl::Ex(seconds) => Duration::from_secs(*seconds),
            Ttl::Px(millis) => Duration::from_millis(*millis),
        }
    }
}

impl Executable for Set {
    fn exec(self, store: Store) -> Result<Frame, StoreError> {
        let mut store = store.lock();

        store.set(self.key, self.value, self.ttl.map(|ttl| ttl.duration()));

        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let value = parser.next_bytes()?;

        let mut ttl = None;

        while parser.remaining() > 0 {
            let option = parser.next_string()?;

            match option.to_uppercase().as_str() {
                "EX" if ttl.is_none() => ttl = Some(Ttl::Ex(next_expire_time(parser)?)),
                "PX" if ttl.is_none() => ttl = Some(Ttl::Px(next_expire_time(parser)?)),
                // Unexpected option, a repeated one, or a missing duration.
                _ => return Err(CommandParserError::SyntaxError),
            }
        }

        Ok(Self { key, value, ttl })
    }
}

fn next_expire_time(parser: &mut CommandParser) -> Result<u64, CommandParserError> {
    if parser.remaining() == 0 {
        return Err(CommandParserError::SyntaxError);
    }

    let value = parser.next_integer()?;
    if value <= 0 {
        return Err(CommandParserError::InvalidExpireTime {
            command: "set".to_string(),
        });
    }

    Ok(value as u64)
}
