//! Chain tip tracking
//!
//! The node only remembers where the next block must attach: the hash and
//! storage address of the last committed block and its number. Nothing is
//! persisted; a restarted node begins again at the genesis sentinel.

use crate::error::{Error, Result};
use crate::types::{Block, StorageAddress, Tip};
use tracing::debug;

/// Process-local record of the committed tip
#[derive(Debug, Clone, Default)]
pub struct ChainState {
    tip: Tip,
}

impl ChainState {
    /// Start at the genesis sentinel
    pub fn new() -> Self {
        Self { tip: Tip::genesis() }
    }

    /// Current tip
    pub fn snapshot(&self) -> Tip {
        self.tip.clone()
    }

    /// Move the tip to a published block.
    ///
    /// The block must have been assembled against the live tip: its number is
    /// exactly one past the tip and its back-links equal the tip's hash and
    /// storage address. Anything else is rejected and leaves the state as is.
    pub fn advance(&mut self, block: &Block, storage_address: StorageAddress) -> Result<Tip> {
        if block.block_number != self.tip.next_block_number() {
            return Err(Error::invariant(format!(
                "block #{} does not follow tip #{}",
                block.block_number, self.tip.block_number
            )));
        }

        if block.previous_hash != self.tip.hash
            || block.previous_storage_address != self.tip.storage_address
        {
            return Err(Error::invariant(format!(
                "block #{} links to {} but the tip is {}",
                block.block_number, block.previous_hash, self.tip.hash
            )));
        }

        self.tip = Tip {
            hash: block.hash.clone(),
            storage_address,
            block_number: block.block_number,
        };

        debug!(
            block_number = self.tip.block_number,
            hash = %self.tip.hash,
            storage_address = %self.tip.storage_address,
            "Chain tip advanced"
        );

        Ok(self.tip.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockTemplate, Nonce, Transaction};
    use assert_matches::assert_matches;

    fn block_on(tip: &Tip, hash: &str) -> Block {
        let txs = vec![Transaction::new("10.0.0.1", "out")];
        BlockTemplate::new(tip, txs, 1_700_000_000, "node-a", 1).seal(Nonce::new(0), hash.to_string())
    }

    #[test]
    fn test_advance_from_genesis() {
        let mut chain = ChainState::new();
        let block = block_on(&chain.snapshot(), "0aa");

        let tip = chain.advance(&block, StorageAddress::new("QmOne")).unwrap();

        assert_eq!(tip.block_number, 1);
        assert_eq!(tip.hash, "0aa");
        assert_eq!(tip.storage_address.as_str(), "QmOne");
        assert_eq!(chain.snapshot(), tip);
    }

    #[test]
    fn test_second_advance_for_same_height_is_rejected() {
        let mut chain = ChainState::new();
        let genesis = chain.snapshot();
        let first = block_on(&genesis, "0aa");
        let second = block_on(&genesis, "0bb");

        chain.advance(&first, StorageAddress::new("QmOne")).unwrap();
        let err = chain.advance(&second, StorageAddress::new("QmTwo")).unwrap_err();

        assert_matches!(err, Error::InvariantViolation { .. });
        assert_eq!(chain.snapshot().hash, "0aa");
        assert_eq!(chain.snapshot().block_number, 1);
    }

    #[test]
    fn test_stale_back_link_is_rejected() {
        let mut chain = ChainState::new();
        let mut block = block_on(&chain.snapshot(), "0aa");
        block.previous_hash = "0ff".to_string();

        let err = chain.advance(&block, StorageAddress::new("QmOne")).unwrap_err();
        assert_matches!(err, Error::InvariantViolation { .. });
        assert_eq!(chain.snapshot(), Tip::genesis());
    }

    #[test]
    fn test_skipping_heights_is_rejected() {
        let mut chain = ChainState::new();
        let mut block = block_on(&chain.snapshot(), "0aa");
        block.block_number = 2;

        assert!(chain.advance(&block, StorageAddress::new("QmOne")).is_err());
        assert_eq!(chain.snapshot().block_number, 0);
    }

    #[test]
    fn test_tip_number_is_monotonic_over_a_chain() {
        let mut chain = ChainState::new();
        let mut last = 0;
        for i in 0..10 {
            let block = block_on(&chain.snapshot(), &format!("0{:x}", i));
            let tip = chain.advance(&block, StorageAddress::new(format!("Qm{}", i))).unwrap();
            assert_eq!(tip.block_number, last + 1);
            last = tip.block_number;
        }
    }
}
