//! Idempotency guard
//!
//! A transfer's idempotency key is inserted into `ledger_idempotency_keys`
//! inside the transfer's own transaction. The unique constraint does the
//! work: a concurrent transaction with the same key blocks on the index until
//! the first one commits (then sees the conflict) or rolls back (then wins).

use tracing::debug;

use super::error::LedgerError;
use super::store::LedgerTx;
use super::types::TxRef;

/// Outcome of claiming an idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// Key was new; the caller owns `tx_ref` and must write the transfer
    Fresh(TxRef),
    /// Key was already used; nothing may be written
    Replay(TxRef),
}

impl IdempotencyOutcome {
    pub fn tx_ref(&self) -> TxRef {
        match self {
            IdempotencyOutcome::Fresh(r) | IdempotencyOutcome::Replay(r) => *r,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, IdempotencyOutcome::Replay(_))
    }
}

pub struct IdempotencyGuard;

impl IdempotencyGuard {
    /// Claim `key` for a new transfer, or resolve it to the transfer that
    /// already used it.
    pub async fn acquire(
        tx: &mut dyn LedgerTx,
        key: &str,
        candidate: TxRef,
    ) -> Result<IdempotencyOutcome, LedgerError> {
        if tx.claim_idempotency_key(key, candidate).await? {
            debug!(idempotency_key = key, tx_ref = %candidate, "Idempotency key claimed");
            return Ok(IdempotencyOutcome::Fresh(candidate));
        }

        let existing = tx.tx_ref_for_key(key).await?.ok_or_else(|| {
            LedgerError::CorruptRow(format!(
                "idempotency key {} exists without tx_ref",
                key
            ))
        })?;

        debug!(idempotency_key = key, tx_ref = %existing, "Idempotency key replayed");
        Ok(IdempotencyOutcome::Replay(existing))
    }
}
