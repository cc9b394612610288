use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;
use crate::store::{InnerStoreLocked, Pattern};
use crate::Error;

/// Returns all keys matching pattern.
///
/// Ref: <https://redis.io/docs/latest/commands/keys/>
#[derive(Debug, PartialEq)]
pub struct Keys {
    pub pattern: String,
}

impl Executable for Keys {
    fn apply(
        self,
        store: &mut InnerStoreLocked<'_>,
        _session: &mut Session,
    ) -> Result<Frame, Error> {
        let pattern = Pattern::new(&self.pattern);
        let keys = store
            .keys(&pattern)?
            .into_iter()
            .map(Frame::Bulk)
            .collect();

        Ok(Frame::Array(keys))
    }
}

impl TryFrom<&mut CommandParser> for Keys {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let pattern = parser.next_string()?;
        Ok(Self { pattern })
    }
}
