use tracing::debug;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::{Store, StoreError};

/// Get the value of `key`. If the key does not exist the special value `nil` is returned.
///
/// Expired keys and keys holding a stream also reply `nil`.
///
/// Ref: <https://redis.io/docs/latest/commands/get/>
#[derive(Debug, PartialEq)]
pub struct Get {
    pub key: String,
}

impl Executable for Get {
    fn exec(self, store: Store) -> Result<Frame, StoreError> {
        let store = store.lock();

        match store.get(&self.key) {
            Ok(value) => Ok(Frame::Bulk(value)),
            Err(StoreError::NotFound) => Ok(Frame::Null),
            Err(StoreError::Expired) => {
                debug!(key = %self.key, "Key has expired");
                Ok(Frame::Null)
            }
            Err(StoreError::TypeMismatch) => {
                debug!(key = %self.key, "GET against a key that does not hold a string");
                Ok(Frame::Null)
            }
            Err(err) => Err(err),
        }
    }
}

impl TryFrom<&mut CommandParser> for Get {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        parser.finish()?;

        Ok(Self { key })
    }
}
