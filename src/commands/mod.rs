pub mod client;
pub mod del;
pub mod discard;
pub mod exec;
pub mod executable;
pub mod exists;
pub mod get;
pub mod keys;
pub mod multi;
pub mod ping;
pub mod scan;
pub mod set;

use bytes::Bytes;
use std::{str, vec};
use thiserror::Error as ThisError;

use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::session::Session;
use crate::store::{InnerStoreLocked, Store};
use crate::Error;

use client::Client;
use del::Del;
use discard::Discard;
use exec::Exec;
use exists::Exists;
use get::Get;
use keys::Keys;
use multi::Multi;
use ping::Ping;
use scan::Scan;
use set::Set;

#[derive(Debug, PartialEq)]
pub enum Command {
    Del(Del),
    Exists(Exists),
    Get(Get),
    Keys(Keys),
    Scan(Scan),
    Set(Set),

    Client(Client),
    Ping(Ping),

    Discard(Discard),
    Exec(Exec),
    Multi(Multi),
}

impl Command {
    /// MULTI, EXEC and DISCARD run immediately even inside a transaction, every other command is
    /// queued.
    pub fn is_transaction_control(&self) -> bool {
        matches!(
            self,
            Command::Multi(_) | Command::Exec(_) | Command::Discard(_)
        )
    }
}

impl Executable for Command {
    fn apply(
        self,
        store: &mut InnerStoreLocked<'_>,
        session: &mut Session,
    ) -> Result<Frame, Error> {
        match self {
            Command::Client(cmd) => cmd.apply(store, session),
            Command::Del(cmd) => cmd.apply(store, session),
            Command::Discard(cmd) => cmd.apply(store, session),
            Command::Exec(cmd) => cmd.apply(store, session),
            Command::Exists(cmd) => cmd.apply(store, session),
            Command::Get(cmd) => cmd.apply(store, session),
            Command::Keys(cmd) => cmd.apply(store, session),
            Command::Multi(cmd) => cmd.apply(store, session),
            Command::Ping(cmd) => cmd.apply(store, session),
            Command::Scan(cmd) => cmd.apply(store, session),
            Command::Set(cmd) => cmd.apply(store, session),
        }
    }

    fn exec(self, store: Store, session: &mut Session) -> Result<Frame, Error> {
        match self {
            Command::Client(cmd) => cmd.exec(store, session),
            Command::Del(cmd) => cmd.exec(store, session),
            Command::Discard(cmd) => cmd.exec(store, session),
            Command::Exec(cmd) => cmd.exec(store, session),
            Command::Exists(cmd) => cmd.exec(store, session),
            Command::Get(cmd) => cmd.exec(store, session),
            Command::Keys(cmd) => cmd.exec(store, session),
            Command::Multi(cmd) => cmd.exec(store, session),
            Command::Ping(cmd) => cmd.exec(store, session),
            Command::Scan(cmd) => cmd.exec(store, session),
            Command::Set(cmd) => cmd.exec(store, session),
        }
    }
}

impl TryFrom<Frame> for Command {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Clients send commands to the Redis server as RESP arrays.
        let frames = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "array".to_string(),
                    actual: frame,
                }
                .into())
            }
        };

        let parser = &mut CommandParser {
            parts: frames.into_iter(),
        };

        let command_name = parser.parse_command_name()?;

        let command = match &command_name[..] {
            "client" => Client::try_from(&mut *parser).map(Command::Client),
            "del" => Del::try_from(&mut *parser).map(Command::Del),
            "discard" => Discard::try_from(&mut *parser).map(Command::Discard),
            "exec" => Exec::try_from(&mut *parser).map(Command::Exec),
            "exists" => Exists::try_from(&mut *parser).map(Command::Exists),
            "get" => Get::try_from(&mut *parser).map(Command::Get),
            "keys" => Keys::try_from(&mut *parser).map(Command::Keys),
            "multi" => Multi::try_from(&mut *parser).map(Command::Multi),
            "ping" => Ping::try_from(&mut *parser).map(Command::Ping),
            "scan" => Scan::try_from(&mut *parser).map(Command::Scan),
            "set" => Set::try_from(&mut *parser).map(Command::Set),
            _ => {
                return Err(CommandParserError::UnknownCommand {
                    command: command_name,
                }
                .into())
            }
        };

        // Running out of arguments, or having some left over, means the arity is wrong.
        let command = command.map_err(|err| match err {
            CommandParserError::EndOfStream => CommandParserError::WrongArgumentCount {
                command: command_name.clone(),
            },
            err => err,
        })?;
        parser.finish(&command_name)?;

        Ok(command)
    }
}

pub struct CommandParser {
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    fn parse_command_name(&mut self) -> Result<String, CommandParserError> {
        let command_name = self
            .parts
            .next()
            .ok_or_else(|| CommandParserError::EndOfStream)?;

        match command_name {
            Frame::Simple(s) => Ok(s.to_lowercase()),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_lowercase())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    fn next_string(&mut self) -> Result<String, CommandParserError> {
        let frame = self
            .parts
            .next()
            .ok_or_else(|| CommandParserError::EndOfStream)?;

        match frame {
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
        let frame = self
            .parts
            .next()
            .ok_or_else(|| CommandParserError::EndOfStream)?;

        match frame {
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
        let frame = self
            .parts
            .next()
            .ok_or_else(|| CommandParserError::EndOfStream)?;

        match frame {
            // Both `Simple` and `Bulk` representation may be strings. Strings are parsed to UTF-8.
            // While errors are stored as strings, they are considered separate types.
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    /// Parses the remaining arguments as raw bytes, requiring at least one.
    fn remaining_bytes(&mut self) -> Result<Vec<Bytes>, CommandParserError> {
        let mut parts = vec![];

        loop {
            match self.next_bytes() {
                Ok(bytes) => parts.push(bytes),
                Err(CommandParserError::EndOfStream) if !parts.is_empty() => break,
                Err(err) => return Err(err),
            }
        }

        Ok(parts)
    }

    fn finish(&mut self, command: &str) -> Result<(), CommandParserError> {
        match self.parts.next() {
            None => Ok(()),
            Some(_) => Err(CommandParserError::WrongArgumentCount {
                command: command.to_string(),
            }),
        }
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("ERR Protocol error: invalid frame, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("ERR unknown command '{command}'")]
    UnknownCommand { command: String },
    #[error("ERR unknown subcommand '{subcommand}'. Try {command} HELP.")]
    UnknownSubcommand { command: String, subcommand: String },
    #[error("ERR wrong number of arguments for '{command}' command")]
    WrongArgumentCount { command: String },
    #[error("ERR {message}")]
    InvalidArgument { message: String },
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR Protocol error: invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
    #[error("ERR Protocol error: attempting to extract a value failed due to the frame being fully consumed")]
    EndOfStream,
}

#[derive(Debug, ThisError, PartialEq)]
pub enum TransactionError {
    #[error("ERR MULTI calls can not be nested")]
    Nested,
    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,
    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,
}
