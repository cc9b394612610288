use bytes::Bytes;
use tracing::debug;

use super::{InnerStoreLocked, StoreError};

/// A mutation recorded while a client's transaction is open.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Put { key: Bytes, value: Bytes },
    Remove { key: Bytes },
}

/// The operation log of an open transaction, replayed in order on commit.
#[derive(Debug, Default)]
pub struct TransactionState {
    pub operations: Vec<Operation>,
}

impl TransactionState {
    /// The value `key` will have once the transaction commits, if the transaction touches it at
    /// all: `Some(None)` means it will be removed.
    fn pending(&self, key: &[u8]) -> Option<Option<Bytes>> {
        self.operations.iter().rev().find_map(|op| match op {
            Operation::Put { key: k, value } if k == key => Some(Some(value.clone())),
            Operation::Remove { key: k } if k == key => Some(None),
            _ => None,
        })
    }
}

impl<'a> InnerStoreLocked<'a> {
    pub fn begin(&mut self, client: u64) -> Result<(), StoreError> {
        if self.state.transactions.contains_key(&client) {
            return Err(StoreError::TransactionExists(client));
        }

        self.state
            .transactions
            .insert(client, TransactionState::default());
        debug!(client, "Started transaction");

        Ok(())
    }

    pub fn in_transaction(&self, client: u64) -> bool {
        self.state.transactions.contains_key(&client)
    }

    /// Applies every queued operation of `client` atomically, returning how many were applied.
    ///
    /// The transaction is closed whatever the outcome. If any operation fails the LMDB write
    /// transaction is aborted and none of the operations become visible. A failure to flush
    /// after the replay is still reported, but by then the operations are applied.
    pub fn commit(&mut self, client: u64) -> Result<usize, StoreError> {
        let transaction = self
            .state
            .transactions
            .remove(&client)
            .ok_or(StoreError::NoTransaction(client))?;

        self.write(|engine, wtxn| {
            for op in &transaction.operations {
                match op {
                    Operation::Put { key, value } => engine.db.put(wtxn, key, value)?,
                    Operation::Remove { key } => {
                        engine.db.delete(wtxn, key)?;
                    }
                }
            }
            Ok(())
        })?;

        let applied = transaction.operations.len();
        for op in transaction.operations {
            match op {
                Operation::Put { key, value } => {
                    self.state.cache.insert(key, value);
                }
                Operation::Remove { key } => {
                    self.state.cache.remove(&key);
                }
            }
        }

        self.sync()?;

        debug!(client, operations = applied, "Committed transaction");
        Ok(applied)
    }

    pub fn abort(&mut self, client: u64) -> Result<(), StoreError> {
        let transaction = self
            .state
            .transactions
            .remove(&client)
            .ok_or(StoreError::NoTransaction(client))?;

        debug!(
            client,
            operations = transaction.operations.len(),
            "Aborted transaction"
        );
        Ok(())
    }

    pub(super) fn pending(&self, key: &[u8]) -> Option<Option<Bytes>> {
        let client = self.client?;
        self.state.transactions.get(&client)?.pending(key)
    }

    pub(super) fn transaction_mut(&mut self) -> Option<&mut TransactionState> {
        let client = self.client?;
        self.state.transactions.get_mut(&client)
    }
}
