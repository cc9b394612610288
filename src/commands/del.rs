use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;
use crate::store::InnerStoreLocked;
use crate::Error;

// https://redis.io/commands/del
#[derive(Debug, PartialEq)]
pub struct Del {
    pub keys: Vec<Bytes>,
}

impl Executable for Del {
    fn apply(
        self,
        store: &mut InnerStoreLocked<'_>,
        _session: &mut Session,
    ) -> Result<Frame, Error> {
        let mut count = 0;
        for key in self.keys {
            if store.remove(&key)? {
                count += 1;
            }
        }

        Ok(Frame::Integer(count))
    }
}

impl TryFrom<&mut CommandParser> for Del {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let keys = parser.remaining_bytes()?;
        Ok(Self { keys })
    }
}
