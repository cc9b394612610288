use bytes::Bytes;
use std::str::FromStr;
use strum_macros::{AsRefStr, EnumString};

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;
use crate::store::{InnerStoreLocked, Store};
use crate::Error;

#[derive(Debug, PartialEq, Clone, Copy, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
enum Subcommand {
    SetName,
    GetName,
    Id,
    List,
    Info,
    SetInfo,
}

/// Connection management commands.
///
/// Ref: <https://redis.io/docs/latest/commands/client/>
#[derive(Debug, PartialEq)]
pub enum Client {
    /// Assigns a name to the current connection, an empty name removes it.
    SetName { name: String },
    GetName,
    Id,
    /// Information about every connected client, one line each.
    List,
    /// Information about the current connection, in the format of a `List` line.
    Info,
    /// Client libraries report their name and version on connect. The values are accepted and
    /// ignored.
    SetInfo { attribute: String, value: String },
}

impl Executable for Client {
    fn apply(
        self,
        _store: &mut InnerStoreLocked<'_>,
        session: &mut Session,
    ) -> Result<Frame, Error> {
        Ok(self.reply(session))
    }

    /// Only connection state is involved, so the store is never locked.
    fn exec(self, _store: Store, session: &mut Session) -> Result<Frame, Error> {
        Ok(self.reply(session))
    }
}

impl Client {
    fn reply(self, session: &mut Session) -> Frame {
        match self {
            Client::SetName { name } => {
                let name = if name.is_empty() { None } else { Some(name) };
                session.set_name(name);
                Frame::Simple("OK".to_string())
            }
            Client::GetName => session
                .name()
                .map_or(Frame::Null, |name| Frame::Bulk(Bytes::from(name.to_string()))),
            Client::Id => Frame::Integer(session.id() as i64),
            Client::List => {
                let list: String = session
                    .clients()
                    .list()
                    .iter()
                    .map(|client| format!("{}\n", client.line()))
                    .collect();
                Frame::Bulk(Bytes::from(list))
            }
            Client::Info => {
                let mut info = session.info.clone();
                info.in_transaction = session.in_transaction;
                Frame::Bulk(Bytes::from(format!("{}\n", info.line())))
            }
            Client::SetInfo { .. } => Frame::Simple("OK".to_string()),
        }
    }
}

impl TryFrom<&mut CommandParser> for Client {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let name = parser.next_string()?;
        let subcommand =
            Subcommand::from_str(&name).map_err(|_| CommandParserError::UnknownSubcommand {
                command: "CLIENT".to_string(),
                subcommand: name.clone(),
            })?;

        let client = match subcommand {
            Subcommand::SetName => {
                let name = parser.next_string();
                let name = subcommand_argument(subcommand, name)?;
                if !is_valid_name(&name) {
                    return Err(CommandParserError::InvalidArgument {
                        message: "Client names cannot contain spaces, newlines or special characters."
                            .to_string(),
                    });
                }
                Client::SetName { name }
            }
            Subcommand::GetName => Client::GetName,
            Subcommand::Id => Client::Id,
            Subcommand::List => Client::List,
            Subcommand::Info => Client::Info,
            Subcommand::SetInfo => {
                let attribute = subcommand_argument(subcommand, parser.next_string())?;
                let value = subcommand_argument(subcommand, parser.next_string())?;
                Client::SetInfo { attribute, value }
            }
        };

        parser
            .finish(&format!("client|{}", subcommand.as_ref()))
            .map(|()| client)
    }
}

/// Reports a missing argument against the subcommand rather than CLIENT itself.
fn subcommand_argument<T>(
    subcommand: Subcommand,
    value: Result<T, CommandParserError>,
) -> Result<T, CommandParserError> {
    value.map_err(|err| match err {
        CommandParserError::EndOfStream => CommandParserError::WrongArgumentCount {
            command: format!("client|{}", subcommand.as_ref()),
        },
        err => err,
    })
}

/// Names are restricted to printable ASCII without spaces, so that CLIENT LIST stays parseable.
fn is_valid_name(name: &str) -> bool {
    name.chars().all(|c| ('!'..='~').contains(&c))
}
