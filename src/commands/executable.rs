use crate::frame::Frame;
use crate::session::Session;
use crate::store::{InnerStoreLocked, Store};
use crate::Error;

pub trait Executable: Sized {
    /// Runs the command against a store the caller already holds locked on behalf of
    /// `session`. EXEC replays a whole queue this way under a single lock.
    fn apply(
        self,
        store: &mut InnerStoreLocked<'_>,
        session: &mut Session,
    ) -> Result<Frame, Error>;

    fn exec(self, store: Store, session: &mut Session) -> Result<Frame, Error> {
        let mut store = store.lock_for(session.id());
        self.apply(&mut store, session)
    }
}
