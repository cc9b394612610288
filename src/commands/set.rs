use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;
use crate::store::InnerStoreLocked;
use crate::Error;

/// Set `key` to hold the string `value`. If `key` already holds a value, it is overwritten.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: Bytes,
    pub value: Bytes,
}

impl Executable for Set {
    fn apply(
        self,
        store: &mut InnerStoreLocked<'_>,
        _session: &mut Session,
    ) -> Result<Frame, Error> {
        store.set(self.key, self.value)?;
        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let value = parser.next_bytes()?;

        Ok(Self { key, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::session::test_utils::session;
    use crate::store::test_utils::temporary_store;

    #[test]
    fn insert_and_overwrite() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("SET")),
            Frame::Bulk(Bytes::from("key1")),
            Frame::Bulk(Bytes::from("1")),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        assert_eq!(
            cmd,
            Command::Set(Set {
                key: Bytes::from("key1"),
                value: Bytes::from("1")
            })
        );

        let (_dir, store) = temporary_store();
        let mut session = session();

        let result = cmd.exec(store.clone(), &mut session).unwrap();
        assert_eq!(result, Frame::Simple("OK".to_string()));
        assert_eq!(store.lock().get("key1").unwrap(), Some(Bytes::from("1")));

        let cmd = Set {
            key: Bytes::from("key1"),
            value: Bytes::from("2"),
        };
        cmd.exec(store.clone(), &mut session).unwrap();
        assert_eq!(store.lock().get("key1").unwrap(), Some(Bytes::from("2")));
    }

    #[test]
    fn binary_value() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("SET")),
            Frame::Bulk(Bytes::from("bin")),
            Frame::Bulk(Bytes::from_static(b"\x00\xff\r\n")),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        let (_dir, store) = temporary_store();
        cmd.exec(store.clone(), &mut session()).unwrap();

        assert_eq!(
            store.lock().get("bin").unwrap(),
            Some(Bytes::from_static(b"\x00\xff\r\n"))
        );
    }

    #[test]
    fn missing_value() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("SET")),
            Frame::Bulk(Bytes::from("key1")),
        ]);

        let err = Command::try_from(frame).unwrap_err();

        assert_eq!(
            err.to_string(),
            "ERR wrong number of arguments for 'set' command"
        );
    }

    #[test]
    fn oversized_key_is_a_storage_error() {
        let (_dir, store) = temporary_store();
        let cmd = Set {
            key: Bytes::from("k".repeat(600)),
            value: Bytes::from("1"),
        };

        let err = cmd.exec(store, &mut session()).unwrap_err();

        assert!(err.to_string().starts_with("ERR storage error"));
    }
}
