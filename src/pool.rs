//! Pending transaction queue
//!
//! Append-only at the tail, drained in fixed-size batches from the head. The
//! pool itself is not synchronised; it lives inside [`crate::ledger::Ledger`]
//! which guards it together with the chain state.

use crate::types::Transaction;
use std::collections::VecDeque;

/// FIFO queue of transactions awaiting inclusion in a block
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transactions: VecDeque<Transaction>,
}

impl TransactionPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            transactions: VecDeque::new(),
        }
    }

    /// Append a transaction at the tail
    pub fn add(&mut self, tx: Transaction) {
        self.transactions.push_back(tx);
    }

    /// Take exactly `batch_size` transactions from the head, or nothing
    pub fn try_take_batch(&mut self, batch_size: usize) -> Option<Vec<Transaction>> {
        if self.transactions.len() < batch_size {
            return None;
        }
        let batch: Vec<Transaction> = self.transactions.drain(..batch_size).collect();
        debug_assert_eq!(batch.len(), batch_size);
        Some(batch)
    }

    /// Put a batch back at the head, keeping its original order
    pub fn requeue_front(&mut self, batch: Vec<Transaction>) {
        for tx in batch.into_iter().rev() {
            self.transactions.push_front(tx);
        }
    }

    /// Number of pending transactions
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Pending transactions in FIFO order
    pub fn pending(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tx(n: usize) -> Transaction {
        Transaction::new(format!("10.0.0.{}", n), format!("result {}", n))
    }

    #[test]
    fn test_batch_unavailable_until_full() {
        let mut pool = TransactionPool::new();
        pool.add(tx(1));
        pool.add(tx(2));

        assert!(pool.try_take_batch(3).is_none());
        assert_eq!(pool.len(), 2);

        pool.add(tx(3));
        let batch = pool.try_take_batch(3).unwrap();
        assert_eq!(batch, vec![tx(1), tx(2), tx(3)]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_take_leaves_remainder_in_order() {
        let mut pool = TransactionPool::new();
        for n in 0..5 {
            pool.add(tx(n));
        }

        let batch = pool.try_take_batch(3).unwrap();
        assert_eq!(batch, vec![tx(0), tx(1), tx(2)]);

        let rest: Vec<_> = pool.pending().cloned().collect();
        assert_eq!(rest, vec![tx(3), tx(4)]);
    }

    #[test]
    fn test_requeue_front_restores_order() {
        let mut pool = TransactionPool::new();
        for n in 0..4 {
            pool.add(tx(n));
        }

        let batch = pool.try_take_batch(3).unwrap();
        pool.add(tx(4));
        pool.requeue_front(batch);

        let all: Vec<_> = pool.pending().cloned().collect();
        assert_eq!(all, (0..5).map(tx).collect::<Vec<_>>());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add,
        Take(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Add), (1usize..5).prop_map(Op::Take)]
    }

    proptest! {
        #[test]
        fn batches_form_prefix_of_insertions(ops in prop::collection::vec(op_strategy(), 0..200)) {
            let mut pool = TransactionPool::new();
            let mut inserted = Vec::new();
            let mut taken = Vec::new();

            for op in ops {
                match op {
                    Op::Add => {
                        let next = tx(inserted.len());
                        inserted.push(next.clone());
                        pool.add(next);
                    }
                    Op::Take(n) => {
                        let before = pool.len();
                        match pool.try_take_batch(n) {
                            Some(batch) => {
                                prop_assert_eq!(batch.len(), n);
                                prop_assert!(before >= n);
                                taken.extend(batch);
                            }
                            None => prop_assert!(before < n),
                        }
                    }
                }
            }

            prop_assert!(taken.len() <= inserted.len());
            prop_assert_eq!(&taken[..], &inserted[..taken.len()]);
            prop_assert_eq!(pool.len(), inserted.len() - taken.len());
        }
    }
}
