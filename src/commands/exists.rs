use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;
use crate::store::InnerStoreLocked;
use crate::Error;

/// Returns if key exists. The user should be aware that if the same existing key is mentioned in
/// the arguments multiple times, it will be counted multiple times.
///
/// Ref: <https://redis.io/docs/latest/commands/exists>
#[derive(Debug, PartialEq)]
pub struct Exists {
    pub keys: Vec<Bytes>,
}

impl Executable for Exists {
    fn apply(
        self,
        store: &mut InnerStoreLocked<'_>,
        _session: &mut Session,
    ) -> Result<Frame, Error> {
        let mut count = 0;
        for key in &self.keys {
            if store.exists(key)? {
                count += 1;
            }
        }

        Ok(Frame::Integer(count))
    }
}

impl TryFrom<&mut CommandParser> for Exists {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let keys = parser.remaining_bytes()?;
        Ok(Self { keys })
    }
}
