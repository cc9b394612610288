use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use itertools::Itertools;
use tracing::{debug, warn};

use crate::commands::executable::Executable;
use crate::commands::Command;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// What CLIENT LIST and CLIENT INFO report about a connection.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: u64,
    pub addr: SocketAddr,
    pub name: Option<String>,
    pub connected_at: Instant,
    pub in_transaction: bool,
}

impl ClientInfo {
    /// Formats the client the way Redis does in CLIENT LIST, one `key=value` pair per field.
    pub fn line(&self) -> String {
        format!(
            "id={} addr={} name={} age={} flags={}",
            self.id,
            self.addr,
            self.name.as_deref().unwrap_or(""),
            self.connected_at.elapsed().as_secs(),
            if self.in_transaction { "x" } else { "N" },
        )
    }
}

/// Registry of the connected clients, shared by every connection.
#[derive(Clone, Default)]
pub struct Clients {
    inner: Arc<Mutex<HashMap<u64, ClientInfo>>>,
}

impl Clients {
    pub fn new() -> Clients {
        Self::default()
    }

    /// Returns every connected client, ordered by id.
    pub fn list(&self) -> Vec<ClientInfo> {
        self.lock()
            .values()
            .cloned()
            .sorted_by_key(|client| client.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, info: ClientInfo) {
        self.lock().insert(info.id, info);
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ClientInfo>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The state of one client connection: its identity and, between MULTI and EXEC, the commands
/// waiting to be executed.
pub struct Session {
    pub info: ClientInfo,
    pub in_transaction: bool,
    pub queue: Vec<Command>,
    clients: Clients,
}

impl Session {
    pub fn new(addr: SocketAddr, clients: Clients) -> Session {
        let info = ClientInfo {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            name: None,
            connected_at: Instant::now(),
            in_transaction: false,
        };
        clients.update(info.clone());

        Session {
            info,
            in_transaction: false,
            queue: Vec::new(),
            clients,
        }
    }

    pub fn id(&self) -> u64 {
        self.info.id
    }

    pub fn name(&self) -> Option<&str> {
        self.info.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.info.name = name;
        self.publish();
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Enters the transaction state. The store must already hold an open transaction for this
    /// client.
    pub fn begin_transaction(&mut self) {
        self.in_transaction = true;
        self.queue.clear();
        self.publish();
    }

    /// Leaves the transaction state, handing back the queued commands.
    pub fn end_transaction(&mut self) -> Vec<Command> {
        self.in_transaction = false;
        self.publish();
        std::mem::take(&mut self.queue)
    }

    /// Executes a request frame, or queues it when a transaction is open, and returns the reply.
    ///
    /// Errors never escape: they are turned into error replies and the connection stays usable.
    pub fn dispatch(&mut self, store: &Store, frame: Frame) -> Frame {
        let cmd = match Command::try_from(frame) {
            Ok(cmd) => cmd,
            Err(err) => return error_reply(err),
        };

        if self.in_transaction && !cmd.is_transaction_control() {
            debug!(client = self.id(), ?cmd, "Queued command");
            self.queue.push(cmd);
            return Frame::Simple("QUEUED".to_string());
        }

        match cmd.exec(store.clone(), self) {
            Ok(frame) => frame,
            Err(err) => error_reply(err),
        }
    }

    /// Releases what the connection holds in the store. A transaction still open when the client
    /// goes away is aborted.
    pub fn close(&mut self, store: &Store) {
        if self.in_transaction {
            self.end_transaction();
            if let Err(err) = store.lock().abort(self.id()) {
                warn!(client = self.id(), %err, "Failed to abort transaction");
            }
        }
    }

    fn publish(&self) {
        let mut info = self.info.clone();
        info.in_transaction = self.in_transaction;
        self.clients.update(info);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.clients.remove(self.id());
    }
}

/// Turns a handler error into an error reply. Messages that don't start with an upper-case error
/// code get the generic `ERR` one.
pub fn error_reply(err: Error) -> Frame {
    let msg = err.to_string();
    let has_code = msg
        .split(' ')
        .next()
        .is_some_and(|code| !code.is_empty() && code.chars().all(|c| c.is_ascii_uppercase()));

    if has_code {
        Frame::Error(msg)
    } else {
        Frame::Error(format!("ERR {msg}"))
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    pub(crate) fn session() -> Session {
        Session::new("127.0.0.1:50000".parse().unwrap(), Clients::new())
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::session;
    use super::*;
    use crate::store::test_utils::temporary_store;
    use bytes::Bytes;

    fn request(parts: &[&str]) -> Frame {
        Frame::Array(
            parts
                .iter()
                .map(|part| Frame::Bulk(Bytes::from(part.to_string())))
                .collect(),
        )
    }

    fn bulk(s: &str) -> Frame {
        Frame::Bulk(Bytes::from(s.to_string()))
    }

    fn ok() -> Frame {
        Frame::Simple("OK".to_string())
    }

    #[test]
    fn set_get_exists_del_scenario() {
        let (_dir, store) = temporary_store();
        let mut session = session();

        assert_eq!(session.dispatch(&store, request(&["SET", "foo", "bar"])), ok());
        assert_eq!(session.dispatch(&store, request(&["GET", "foo"])), bulk("bar"));
        assert_eq!(
            session.dispatch(&store, request(&["EXISTS", "foo"])),
            Frame::Integer(1)
        );
        assert_eq!(
            session.dispatch(&store, request(&["DEL", "foo"])),
            Frame::Integer(1)
        );
        assert_eq!(
            session.dispatch(&store, request(&["EXISTS", "foo"])),
            Frame::Integer(0)
        );
        assert_eq!(session.dispatch(&store, request(&["GET", "foo"])), Frame::Null);
    }

    #[test]
    fn command_names_are_case_insensitive() {
        let (_dir, store) = temporary_store();
        let mut session = session();

        assert_eq!(session.dispatch(&store, request(&["sEt", "k", "v"])), ok());
        assert_eq!(session.dispatch(&store, request(&["get", "k"])), bulk("v"));
    }

    #[test]
    fn unknown_command_does_not_change_state() {
        let (_dir, store) = temporary_store();
        let mut session = session();

        let reply = session.dispatch(&store, request(&["FOO", "bar"]));
        assert!(matches!(reply, Frame::Error(ref msg) if msg.starts_with("ERR unknown command")));

        session.dispatch(&store, request(&["MULTI"]));
        let reply = session.dispatch(&store, request(&["FOO"]));
        assert!(matches!(reply, Frame::Error(ref msg) if msg.starts_with("ERR unknown command")));
        assert!(session.in_transaction);
        assert!(session.queue.is_empty());
    }

    #[test]
    fn transaction_reads_observe_earlier_writes() {
        let (_dir, store) = temporary_store();
        let mut session = session();
        session.dispatch(&store, request(&["SET", "k", "v1"]));

        assert_eq!(session.dispatch(&store, request(&["MULTI"])), ok());
        let queued = Frame::Simple("QUEUED".to_string());
        assert_eq!(session.dispatch(&store, request(&["GET", "k"])), queued);
        assert_eq!(session.dispatch(&store, request(&["SET", "k", "v2"])), queued);
        assert_eq!(session.dispatch(&store, request(&["GET", "k"])), queued);

        assert_eq!(
            session.dispatch(&store, request(&["EXEC"])),
            Frame::Array(vec![bulk("v1"), ok(), bulk("v2")])
        );
        assert!(!session.in_transaction);
        assert_eq!(session.dispatch(&store, request(&["GET", "k"])), bulk("v2"));
    }

    #[test]
    fn queued_writes_are_invisible_to_other_clients() {
        let (_dir, store) = temporary_store();
        let mut writer = session();
        let mut reader = session();

        writer.dispatch(&store, request(&["MULTI"]));
        writer.dispatch(&store, request(&["SET", "k", "v"]));

        assert_eq!(reader.dispatch(&store, request(&["GET", "k"])), Frame::Null);
        writer.dispatch(&store, request(&["EXEC"]));
        assert_eq!(reader.dispatch(&store, request(&["GET", "k"])), bulk("v"));
    }

    #[test]
    fn failing_transaction_applies_nothing() {
        let (_dir, store) = temporary_store();
        let mut session = session();
        let long_key = "k".repeat(600);

        session.dispatch(&store, request(&["MULTI"]));
        session.dispatch(&store, request(&["SET", "a", "1"]));
        session.dispatch(&store, request(&["SET", &long_key, "2"]));
        session.dispatch(&store, request(&["SET", "b", "3"]));

        let reply = session.dispatch(&store, request(&["EXEC"]));
        assert!(matches!(reply, Frame::Error(_)));
        assert!(!session.in_transaction);

        assert_eq!(session.dispatch(&store, request(&["GET", "a"])), Frame::Null);
        assert_eq!(session.dispatch(&store, request(&["GET", "b"])), Frame::Null);
        assert!(!store.lock().in_transaction(session.id()));
    }

    #[test]
    fn discard_drops_the_queue() {
        let (_dir, store) = temporary_store();
        let mut session = session();

        session.dispatch(&store, request(&["MULTI"]));
        session.dispatch(&store, request(&["SET", "k", "v"]));
        assert_eq!(session.dispatch(&store, request(&["DISCARD"])), ok());

        assert!(!session.in_transaction);
        assert_eq!(session.dispatch(&store, request(&["GET", "k"])), Frame::Null);
    }

    #[test]
    fn transaction_control_errors() {
        let (_dir, store) = temporary_store();
        let mut session = session();

        assert_eq!(
            session.dispatch(&store, request(&["EXEC"])),
            Frame::Error("ERR EXEC without MULTI".to_string())
        );
        assert_eq!(
            session.dispatch(&store, request(&["DISCARD"])),
            Frame::Error("ERR DISCARD without MULTI".to_string())
        );

        session.dispatch(&store, request(&["MULTI"]));
        assert_eq!(
            session.dispatch(&store, request(&["MULTI"])),
            Frame::Error("ERR MULTI calls can not be nested".to_string())
        );
        assert!(session.in_transaction);
    }

    #[test]
    fn wrong_arity_is_not_queued() {
        let (_dir, store) = temporary_store();
        let mut session = session();

        session.dispatch(&store, request(&["MULTI"]));
        let reply = session.dispatch(&store, request(&["GET"]));

        assert_eq!(
            reply,
            Frame::Error("ERR wrong number of arguments for 'get' command".to_string())
        );
        assert!(session.queue.is_empty());
        assert_eq!(session.dispatch(&store, request(&["EXEC"])), Frame::Array(vec![]));
    }

    #[test]
    fn close_aborts_an_open_transaction() {
        let (_dir, store) = temporary_store();
        let mut session = session();

        session.dispatch(&store, request(&["MULTI"]));
        session.dispatch(&store, request(&["SET", "k", "v"]));
        session.close(&store);

        assert!(!store.lock().in_transaction(session.id()));
        assert_eq!(store.lock().get("k").unwrap(), None);
    }

    #[test]
    fn sessions_register_while_alive() {
        let clients = Clients::new();
        let first = Session::new("127.0.0.1:1".parse().unwrap(), clients.clone());
        let second = Session::new("127.0.0.1:2".parse().unwrap(), clients.clone());

        let ids: Vec<u64> = clients.list().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);

        drop(first);
        assert_eq!(clients.len(), 1);
        drop(second);
        assert!(clients.is_empty());
    }

    #[test]
    fn error_replies_keep_existing_codes() {
        assert_eq!(
            error_reply("EXECABORT Transaction discarded".into()),
            Frame::Error("EXECABORT Transaction discarded".to_string())
        );
        assert_eq!(
            error_reply("something failed".into()),
            Frame::Error("ERR something failed".to_string())
        );
    }
}
