use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::session::Session;
use crate::store::{InnerStoreLocked, Pattern};
use crate::Error;

const DEFAULT_COUNT: usize = 10;

/// The SCAN command is used in order to incrementally iterate over a collection of elements.
///
/// A cursor of `0` starts a new iteration and the server replies with `0` once it is complete.
/// Cursors that the server doesn't know about, including ones that expired or are not numbers at
/// all, also start a new iteration.
///
/// Ref: <https://redis.io/docs/latest/commands/scan>
#[derive(Debug, PartialEq)]
pub struct Scan {
    pub cursor: u64,
    pub pattern: Option<String>,
    pub count: usize,
}

impl Executable for Scan {
    fn apply(
        self,
        store: &mut InnerStoreLocked<'_>,
        _session: &mut Session,
    ) -> Result<Frame, Error> {
        let pattern = self
            .pattern
            .as_deref()
            .map_or_else(Pattern::default, Pattern::new);

        let page = store.scan(self.cursor, &pattern, self.count)?;

        let next_cursor = Frame::Bulk(Bytes::from(page.cursor.to_string()));
        let keys = page.keys.into_iter().map(Frame::Bulk).collect();

        Ok(Frame::Array(vec![next_cursor, Frame::Array(keys)]))
    }
}

impl TryFrom<&mut CommandParser> for Scan {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let cursor = parser.next_string()?.parse::<u64>().unwrap_or(0);

        let mut pattern = None;
        let mut count = DEFAULT_COUNT;

        loop {
            let option = match parser.next_string() {
                Ok(option) => option,
                Err(CommandParserError::EndOfStream) => break,
                Err(err) => return Err(err),
            };

            match option.to_lowercase().as_str() {
                "match" => pattern = Some(option_value(parser.next_string())?),
                "count" => {
                    let n = option_value(parser.next_integer())?;
                    if n < 1 {
                        return Err(CommandParserError::Syntax);
                    }
                    count = usize::try_from(n).map_err(|_| CommandParserError::NotAnInteger)?;
                }
                _ => return Err(CommandParserError::Syntax),
            }
        }

        Ok(Self {
            cursor,
            pattern,
            count,
        })
    }
}

/// An option given without its value is a syntax error rather than an arity one.
fn option_value<T>(value: Result<T, CommandParserError>) -> Result<T, CommandParserError> {
    value.map_err(|err| match err {
        CommandParserError::EndOfStream => CommandParserError::Syntax,
        err => err,
    })
}
