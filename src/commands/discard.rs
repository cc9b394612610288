use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError, TransactionError};
use crate::frame::Frame;
use crate::session::Session;
use crate::store::InnerStoreLocked;
use crate::Error;

/// Flushes all previously queued commands in a transaction and restores the connection state to
/// normal.
///
/// Ref: <https://redis.io/docs/latest/commands/discard/>
#[derive(Debug, PartialEq)]
pub struct Discard;

impl Executable for Discard {
    fn apply(
        self,
        store: &mut InnerStoreLocked<'_>,
        session: &mut Session,
    ) -> Result<Frame, Error> {
        if !session.in_transaction {
            return Err(TransactionError::DiscardWithoutMulti.into());
        }

        session.end_transaction();
        store.abort(session.id())?;

        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Discard {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
