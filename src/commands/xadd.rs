use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::{Store, StoreError};
use crate::stream::StreamId;

/// Appends the specified stream entry to the stream at the specified key. If the key does not
/// exist, a stream is created.
///
/// The id is taken as given: it must be greater than `0-0` and greater than the id of the last
/// entry in the stream. The reply is the id exactly as the client wrote it. Auto-generated ids
/// (`*`) are not supported.
///
/// Ref: <https://redis.io/docs/latest/commands/xadd/>
#[derive(Debug, PartialEq)]
pub struct Xadd {
    pub key: String,
    pub id: StreamId,
    /// The id as sent by the client, returned on success.
    pub literal_id: String,
    pub fields: Vec<(Bytes, Bytes)>,
}

impl Executable for Xadd {
    fn exec(self, store: Store) -> Result<Frame, StoreError> {
        store
            .lock()
            .stream_append(&self.key, self.id, self.fields)?;

        Ok(Frame::Bulk(Bytes::from(self.literal_id)))
    }
}

impl TryFrom<&mut CommandParser> for Xadd {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        // key, id and at least one complete field/value pair.
        let remaining = parser.remaining();
        if remaining < 4 || remaining % 2 != 0 {
            return Err(parser.wrong_number_of_arguments());
        }

        let key = parser.next_string()?;
        let literal_id = parser.next_string()?;
        let id = literal_id
            .parse::<StreamId>()
            .map_err(|_| CommandParserError::InvalidStreamId)?;

        let mut fields = Vec::with_capacity((remaining - 2) / 2);
        while parser.remaining() > 0 {
            let field = parser.next_bytes()?;
            let value = parser.next_bytes()?;
            fields.push((field, value));
        }

        Ok(Self {
            key,
            id,
            literal_id,
            fields,
        })
    }
}
