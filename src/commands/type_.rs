use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::{Store, StoreError};

/// Returns the string representation of the type of the value stored at `key`.
///
/// The different types that can be returned are: `string`, `list`, `set`, `zset`, `hash` and `stream`.
/// If the key does not exist, `none` is returned.
///
/// **NOTE**: This server implementation only supports `string` and `stream` types. A string
/// past its deadline still reports `string`.
///
/// Ref: <https://redis.io/docs/latest/commands/type/>
#[derive(Debug, PartialEq)]
pub struct Type {
    pub key: String,
}

impl Executable for Type {
    fn exec(self, store: Store) -> Result<Frame, StoreError> {
        let type_ = store.lock().type_of(&self.key);

        Ok(Frame::Simple(type_.to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Type {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        parser.finish()?;

        Ok(Self { key })
    }
}
