use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;
use crate::store::{InnerStoreLocked, Store};
use crate::Error;

/// Returns PONG if no argument is provided, otherwise return a copy of the argument as a bulk.
///
/// Ref: <https://redis.io/docs/latest/commands/ping>
#[derive(Debug, PartialEq)]
pub struct Ping {
    pub payload: Option<Bytes>,
}

impl Executable for Ping {
    fn apply(
        self,
        _store: &mut InnerStoreLocked<'_>,
        _session: &mut Session,
    ) -> Result<Frame, Error> {
        Ok(self.reply())
    }

    fn exec(self, _store: Store, _session: &mut Session) -> Result<Frame, Error> {
        Ok(self.reply())
    }
}

impl Ping {
    fn reply(self) -> Frame {
        self.payload
            .map_or(Frame::Simple("PONG".to_string()), Frame::Bulk)
    }
}

impl TryFrom<&mut CommandParser> for Ping {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let payload = match parser.next_bytes() {
            Ok(payload) => Some(payload),
            Err(CommandParserError::EndOfStream) => None,
            Err(e) => return Err(e),
        };

        Ok(Self { payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::session::test_utils::session;
    use crate::store::test_utils::temporary_store;

    #[test]
    fn without_payload() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("PING"))]);
        let cmd = Command::try_from(frame).unwrap();

        assert_eq!(cmd, Command::Ping(Ping { payload: None }));

        let (_dir, store) = temporary_store();
        let result = cmd.exec(store, &mut session()).unwrap();

        assert_eq!(result, Frame::Simple("PONG".to_string()));
    }

    #[test]
    fn with_payload() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("PING")),
            Frame::Bulk(Bytes::from("hello")),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        assert_eq!(
            cmd,
            Command::Ping(Ping {
                payload: Some(Bytes::from("hello"))
            })
        );

        let (_dir, store) = temporary_store();
        let result = cmd.exec(store, &mut session()).unwrap();

        assert_eq!(result, Frame::Bulk(Bytes::from("hello")));
    }

    #[test]
    fn too_many_arguments() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("PING")),
            Frame::Bulk(Bytes::from("hello")),
            Frame::Bulk(Bytes::from("world")),
        ]);

        let err = Command::try_from(frame).unwrap_err();

        assert_eq!(
            err.to_string(),
            "ERR wrong number of arguments for 'ping' command"
        );
    }
}
