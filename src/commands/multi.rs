use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError, TransactionError};
use crate::frame::Frame;
use crate::session::Session;
use crate::store::InnerStoreLocked;
use crate::Error;

/// Marks the start of a transaction block. Subsequent commands will be queued for atomic
/// execution using EXEC.
///
/// Ref: <https://redis.io/docs/latest/commands/multi/>
#[derive(Debug, PartialEq)]
pub struct Multi;

impl Executable for Multi {
    fn apply(
        self,
        store: &mut InnerStoreLocked<'_>,
        session: &mut Session,
    ) -> Result<Frame, Error> {
        if session.in_transaction {
            return Err(TransactionError::Nested.into());
        }

        store.begin(session.id())?;
        session.begin_transaction();

        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Multi {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::session::test_utils::session;
    use crate::store::test_utils::temporary_store;
    use bytes::Bytes;

    #[test]
    fn opens_a_transaction() {
        let frame = Frame::Array(vec![Frame::Bulk(Bytes::from("MULTI"))]);
        let cmd = Command::try_from(frame).unwrap();
        assert_eq!(cmd, Command::Multi(Multi));

        let (_dir, store) = temporary_store();
        let mut session = session();

        let result = cmd.exec(store.clone(), &mut session).unwrap();

        assert_eq!(result, Frame::Simple("OK".to_string()));
        assert!(session.in_transaction);
        assert!(store.lock().in_transaction(session.id()));
    }

    #[test]
    fn nested() {
        let (_dir, store) = temporary_store();
        let mut session = session();
        Multi.exec(store.clone(), &mut session).unwrap();

        let err = Multi.exec(store.clone(), &mut session).unwrap_err();

        assert_eq!(err.to_string(), "ERR MULTI calls can not be nested");
        assert!(session.in_transaction);
    }

    #[test]
    fn takes_no_arguments() {
        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("MULTI")),
            Frame::Bulk(Bytes::from("now")),
        ]);

        let err = Command::try_from(frame).unwrap_err();

        assert_eq!(
            err.to_string(),
            "ERR wrong number of arguments for 'multi' command"
        );
    }
}
