use tracing::{debug, warn};

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError, TransactionError};
use crate::frame::Frame;
use crate::session::Session;
use crate::store::{InnerStoreLocked, StoreError};
use crate::Error;

/// Executes all previously queued commands in a transaction and restores the connection state to
/// normal.
///
/// Writes made by the queued commands are applied together: when one of the commands fails, or
/// the writes can't be persisted, none of them are and the error is returned instead of the
/// replies. The queue is replayed and committed under one store lock, so no other client's
/// command lands in between.
///
/// Ref: <https://redis.io/docs/latest/commands/exec/>
#[derive(Debug, PartialEq)]
pub struct Exec;

impl Executable for Exec {
    fn apply(
        self,
        store: &mut InnerStoreLocked<'_>,
        session: &mut Session,
    ) -> Result<Frame, Error> {
        if !session.in_transaction {
            return Err(TransactionError::ExecWithoutMulti.into());
        }

        let client = session.id();
        let queue = session.end_transaction();

        // The store drops every transaction when it is reset.
        if !store.in_transaction(client) {
            return Err(StoreError::NoTransaction(client).into());
        }

        let mut replies = Vec::with_capacity(queue.len());
        for cmd in queue {
            match cmd.apply(store, session) {
                Ok(reply) => replies.push(reply),
                Err(err) => {
                    if let Err(abort_err) = store.abort(client) {
                        warn!(client, %abort_err, "Failed to abort transaction");
                    }
                    return Err(err);
                }
            }
        }

        let operations = store.commit(client)?;
        debug!(client, operations, "Executed transaction");

        Ok(Frame::Array(replies))
    }
}

impl TryFrom<&mut CommandParser> for Exec {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::get::Get;
    use crate::commands::multi::Multi;
    use crate::commands::set::Set;
    use crate::commands::Command;
    use crate::session::test_utils::session;
    use crate::store::test_utils::temporary_store;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn queue(session: &mut Session, cmd: Command) {
        session.queue.push(cmd);
    }

    #[test]
    fn replies_in_queue_order() {
        let (_dir, store) = temporary_store();
        let mut session = session();
        Multi.exec(store.clone(), &mut session).unwrap();
        queue(
            &mut session,
            Command::Set(Set {
                key: Bytes::from("k"),
                value: Bytes::from("v"),
            }),
        );
        queue(
            &mut session,
            Command::Get(Get {
                key: Bytes::from("k"),
            }),
        );

        let result = Exec.exec(store.clone(), &mut session).unwrap();

        assert_eq!(
            result,
            Frame::Array(vec![
                Frame::Simple("OK".to_string()),
                Frame::Bulk(Bytes::from("v")),
            ])
        );
        assert!(!session.in_transaction);
        assert!(session.queue.is_empty());
        assert!(!store.lock().in_transaction(session.id()));
    }

    #[test]
    fn empty_transaction() {
        let (_dir, store) = temporary_store();
        let mut session = session();
        Multi.exec(store.clone(), &mut session).unwrap();

        let result = Exec.exec(store, &mut session).unwrap();

        assert_eq!(result, Frame::Array(vec![]));
    }

    #[test]
    fn without_multi() {
        let (_dir, store) = temporary_store();

        let err = Exec.exec(store, &mut session()).unwrap_err();

        assert_eq!(err.to_string(), "ERR EXEC without MULTI");
    }

    #[test]
    fn transaction_lost_on_reset() {
        let (_dir, store) = temporary_store();
        let mut session = session();
        Multi.exec(store.clone(), &mut session).unwrap();
        queue(
            &mut session,
            Command::Set(Set {
                key: Bytes::from("k"),
                value: Bytes::from("v"),
            }),
        );

        store.reset().unwrap();
        let err = Exec.exec(store.clone(), &mut session).unwrap_err();

        assert!(err.to_string().starts_with("ERR no transaction"));
        assert!(!session.in_transaction);
        assert_eq!(store.lock().get("k").unwrap(), None);
    }

    #[test]
    fn failed_commit_applies_nothing() {
        let (_dir, store) = temporary_store();
        let mut session = session();
        Multi.exec(store.clone(), &mut session).unwrap();
        for key in ["a".to_string(), "k".repeat(600), "b".to_string()] {
            queue(
                &mut session,
                Command::Set(Set {
                    key: Bytes::from(key),
                    value: Bytes::from("v"),
                }),
            );
        }

        let err = Exec.exec(store.clone(), &mut session).unwrap_err();

        assert!(err.to_string().starts_with("ERR storage error"));
        let mut store = store.lock();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap(), None);
        assert_eq!(store.size().unwrap(), 0);
    }

    #[test]
    fn replay_is_not_interleaved_with_other_clients() {
        let (_dir, store) = temporary_store();
        store
            .lock()
            .set("k".to_string(), Bytes::from("0"))
            .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let store = store.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut i = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    i += 1;
                    store
                        .lock()
                        .set("k".to_string(), Bytes::from(i.to_string()))
                        .unwrap();
                }
            })
        };

        for _ in 0..20 {
            let mut session = session();
            Multi.exec(store.clone(), &mut session).unwrap();
            for _ in 0..50 {
                queue(
                    &mut session,
                    Command::Get(Get {
                        key: Bytes::from("k"),
                    }),
                );
            }

            let Frame::Array(replies) = Exec.exec(store.clone(), &mut session).unwrap() else {
                panic!("expected an array reply");
            };

            assert_eq!(replies.len(), 50);
            assert!(
                replies.windows(2).all(|pair| pair[0] == pair[1]),
                "a write landed in the middle of the transaction: {replies:?}"
            );
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }
}
