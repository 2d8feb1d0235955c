pub mod echo;
pub mod executable;
pub mod get;
pub mod ping;
pub mod set;
pub mod type_;
pub mod xadd;

use bytes::Bytes;
use std::{str, vec};
use thiserror::Error as ThisError;

use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::store::{Store, StoreError};

use echo::Echo;
use get::Get;
use ping::Ping;
use set::Set;
use type_::Type;
use xadd::Xadd;

#[derive(Debug, PartialEq)]
pub enum Command {
    Echo(Echo),
    Get(Get),
    Ping(Ping),
    Set(Set),
    Type(Type),
    Xadd(Xadd),
}

impl Executable for Command {
    fn exec(self, store: Store) -> Result<Frame, StoreError> {
        match self {
            Command::Echo(cmd) => cmd.exec(store),
            Command::Get(cmd) => cmd.exec(store),
            Command::Ping(cmd) => cmd.exec(store),
            Command::Set(cmd) => cmd.exec(store),
            Command::Type(cmd) => cmd.exec(store),
            Command::Xadd(cmd) => cmd.exec(store),
        }
    }
}

impl TryFrom<Frame> for Command {
    type Error = CommandParserError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Clients send commands to the Redis server as RESP arrays.
        let frames = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "array".to_string(),
                    actual: frame,
                })
            }
        };

        let mut parts = frames.into_iter();
        let raw_name = parse_command_name(parts.next())?;
        let command_name = raw_name.to_lowercase();

        let parser = &mut CommandParser {
            name: command_name.clone(),
            parts,
        };

        match command_name.as_str() {
            "echo" => Echo::try_from(parser).map(Command::Echo),
            "get" => Get::try_from(parser).map(Command::Get),
            "ping" => Ping::try_from(parser).map(Command::Ping),
            "set" => Set::try_from(parser).map(Command::Set),
            "type" => Type::try_from(parser).map(Command::Type),
            "xadd" => Xadd::try_from(parser).map(Command::Xadd),
            _ => Err(CommandParserError::UnknownCommand {
                command: raw_name,
                args: parser.describe_remaining(),
            }),
        }
    }
}

/// Command names are matched case-insensitively; the name is returned as the client sent it.
fn parse_command_name(frame: Option<Frame>) -> Result<String, CommandParserError> {
    match frame {
        None => Err(CommandParserError::EmptyCommand),
        Some(Frame::Simple(s)) => Ok(s),
        Some(Frame::Bulk(bytes)) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Some(frame) => Err(CommandParserError::InvalidFrame {
            expected: "simple or bulk string".to_string(),
            actual: frame,
        }),
    }
}

/// Cursor over the arguments of a single command. Running out of arguments is reported as an
/// arity error for the command being parsed.
pub struct CommandParser {
    name: String,
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    fn wrong_number_of_arguments(&self) -> CommandParserError {
        CommandParserError::WrongNumberOfArguments {
            command: self.name.clone(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame, CommandParserError> {
        match self.parts.next() {
            Some(frame) => Ok(frame),
            None => Err(self.wrong_number_of_arguments()),
        }
    }

    fn next_string(&mut self) -> Result<String, CommandParserError> {
        match self.next_frame()? {
            // Both `Simple` and `Bulk` representation may be strings. Strings are parsed to UTF-8.
            // While errors are stored as strings, they are considered separate types.
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_string())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    fn next_integer(&mut self) -> Result<i64, CommandParserError> {
        match self.next_frame()? {
            Frame::Integer(i) => Ok(i),
            Frame::Simple(string) => string
                .parse::<i64>()
                .map_err(|_| CommandParserError::NotAnInteger),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(CommandParserError::NotAnInteger),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "integer".to_string(),
                actual: frame,
            }),
        }
    }

    fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        match self.next_frame()? {
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    fn remaining(&self) -> usize {
        self.parts.len()
    }

    /// Fails if arguments are left over once a fixed-arity command has taken what it needs.
    fn finish(&self) -> Result<(), CommandParserError> {
        if self.remaining() > 0 {
            return Err(self.wrong_number_of_arguments());
        }
        Ok(())
    }

    fn describe_remaining(&self) -> String {
        self.parts
            .as_slice()
            .iter()
            .map(|frame| match frame {
                Frame::Bulk(bytes) => format!("'{}' ", String::from_utf8_lossy(bytes)),
                frame => format!("'{}' ", frame),
            })
            .collect()
    }
}

/// Errors raised while turning a frame into a command. They are reported to the client and the
/// connection carries on.
#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("ERR Protocol error: expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("ERR Protocol error: empty command")]
    EmptyCommand,
    #[error("ERR unknown command '{command}', with args beginning with: {args}")]
    UnknownCommand { command: String, args: String },
    #[error("ERR wrong number of arguments for '{command}' command")]
    WrongNumberOfArguments { command: String },
    #[error("ERR syntax error")]
    SyntaxError,
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR invalid expire time in '{command}' command")]
    InvalidExpireTime { command: String },
    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidStreamId,
    #[error("ERR invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_get_command_with_simple_string() {
        let get_frame = Frame::Array(vec![
            Frame::Simple(String::from("GET")),
            Frame::Simple(String::from("foo")),
        ]);

        let get_command = Command::try_from(get_frame).unwrap();

        assert_eq!(
            get_command,
            Command::Get(Get {
                key: String::from("foo")
            })
        );
    }

    #[test]
    fn parse_get_command_with_bulk_string() {
        let get_frame = Frame::Array(vec![
            Frame::Simple(String::from("GET")),
            Frame::Bulk(Bytes::from("foo-from-bytes")),
        ]);

        let get_command = Command::try_from(get_frame).unwrap();

        assert_eq!(
            get_command,
            Command::Get(Get {
                key: String::from("foo-from-bytes")
            })
        );
    }

    #[test]
    fn command_names_are_case_insensitive() {
        for name in ["ping", "PING", "PiNg"] {
            let frame = Frame::Array(vec![Frame::Bulk(Bytes::from(name))]);

            assert_eq!(
                Command::try_from(frame),
                Ok(Command::Ping(ping::Ping { payload: None }))
            );
        }
    }

    #[test]
    fn unknown_command() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("FLUSHALL")),
            Frame::Bulk(Bytes::from("ASYNC")),
        ]);

        let err = Command::try_from(frame).unwrap_err();

        assert_eq!(
            err,
            CommandParserError::UnknownCommand {
                command: "FLUSHALL".to_string(),
                args: "'ASYNC' ".to_string(),
            }
        );
        assert_eq!(
            err.to_string(),
            "ERR unknown command 'FLUSHALL', with args beginning with: 'ASYNC' "
        );
    }

    #[test]
    fn unknown_command_keeps_name_case() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("FlushAll"))]);

        let err = Command::try_from(frame).unwrap_err();

        assert_eq!(
            err.to_string(),
            "ERR unknown command 'FlushAll', with args beginning with: "
        );
    }

    #[test]
    fn empty_command() {
        let err = Command::try_from(Frame::Array(vec![])).unwrap_err();

        assert_eq!(err, CommandParserError::EmptyCommand);
    }

    #[test]
    fn non_array_frame() {
        let err = Command::try_from(Frame::Simple("PING".to_string())).unwrap_err();

        assert_eq!(
            err,
            CommandParserError::InvalidFrame {
                expected: "array".to_string(),
                actual: Frame::Simple("PING".to_string()),
            }
        );
    }

    #[test]
    fn missing_argument_is_an_arity_error() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("GET"))]);

        let err = Command::try_from(frame).unwrap_err();

        assert_eq!(
            err,
            CommandParserError::WrongNumberOfArguments {
                command: "get".to_string()
            }
        );
        assert_eq!(
            err.to_string(),
            "ERR wrong number of arguments for 'get' command"
        );
    }

    #[test]
    fn extra_argument_is_an_arity_error() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("TYPE")),
            Frame::Bulk(Bytes::from("a")),
            Frame::Bulk(Bytes::from("b")),
        ]);

        let err = Command::try_from(frame).unwrap_err();

        assert_eq!(
            err,
            CommandParserError::WrongNumberOfArguments {
                command: "type".to_string()
            }
        );
    }

    #[test]
    fn invalid_argument_frame() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("GET")),
            Frame::Array(vec![]),
        ]);

        let err = Command::try_from(frame).unwrap_err();

        assert_eq!(
            err,
            CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: Frame::Array(vec![]),
            }
        );
    }
}
