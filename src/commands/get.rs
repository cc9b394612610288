use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;
use crate::store::InnerStoreLocked;
use crate::Error;

/// Get the value of `key`. If the key does not exist the special value `nil` is returned.
///
/// Ref: <https://redis.io/docs/latest/commands/get/>
#[derive(Debug, PartialEq)]
pub struct Get {
    pub key: Bytes,
}

impl Executable for Get {
    fn apply(
        self,
        store: &mut InnerStoreLocked<'_>,
        _session: &mut Session,
    ) -> Result<Frame, Error> {
        let value = store.get(&self.key)?;

        match value {
            Some(value) => Ok(Frame::Bulk(value)),
            None => Ok(Frame::Null),
        }
    }
}

impl TryFrom<&mut CommandParser> for Get {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::session::test_utils::session;
    use crate::store::test_utils::temporary_store;

    #[test]
    fn existing_key() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("GET")),
            Frame::Bulk(Bytes::from("key1")),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        assert_eq!(
            cmd,
            Command::Get(Get {
                key: Bytes::from("key1")
            })
        );

        let (_dir, store) = temporary_store();
        store
            .lock()
            .set(String::from("key1"), Bytes::from("1"))
            .unwrap();

        let result = cmd.exec(store.clone(), &mut session()).unwrap();

        assert_eq!(result, Frame::Bulk(Bytes::from("1")));
    }

    #[test]
    fn missing_key() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("GET")),
            Frame::Bulk(Bytes::from("key1")),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        let (_dir, store) = temporary_store();

        let result = cmd.exec(store.clone(), &mut session()).unwrap();

        assert_eq!(result, Frame::Null);
    }

    #[test]
    fn binary_key() {
        let key = Bytes::from_static(b"\xff\x00k");
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("GET")), Frame::Bulk(key.clone())]);
        let cmd = Command::try_from(frame).unwrap();

        let (_dir, store) = temporary_store();
        store.lock().set(key, Bytes::from("1")).unwrap();

        let result = cmd.exec(store, &mut session()).unwrap();

        assert_eq!(result, Frame::Bulk(Bytes::from("1")));
    }

    #[test]
    fn closed_store() {
        let (_dir, store) = temporary_store();
        store.close();

        let cmd = Get {
            key: Bytes::from("key1"),
        };
        let err = cmd.exec(store, &mut session()).unwrap_err();

        assert_eq!(err.to_string(), "ERR storage engine is closed");
    }
}
