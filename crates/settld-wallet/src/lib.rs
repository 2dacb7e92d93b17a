//! Settld Wallet - pure escrow state transitions
//!
//! Every operation takes wallet snapshots by reference and returns the next
//! state; the store is the only writer. A failed operation returns an error
//! and never a mutated wallet, so lock-failure atomicity holds by
//! construction.
//!
//! # Invariants
//!
//! 1. All fields ≥ 0
//! 2. `available + escrowLocked = totalCredited − totalDebited`
//! 3. A release+refund pair over one lock conserves the locked amount

use chrono::{DateTime, Utc};
use settld_types::{AgentWallet, SettldError};

/// Both sides of a release
#[derive(Debug, Clone)]
pub struct ReleaseOutcome {
    pub payer_wallet: AgentWallet,
    pub payee_wallet: AgentWallet,
}

/// Outcome of a split resolution over one locked amount
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub payer_wallet: AgentWallet,
    pub payee_wallet: AgentWallet,
    pub released_cents: i64,
    pub refunded_cents: i64,
}

fn require_positive(amount: i64) -> Result<(), SettldError> {
    if amount <= 0 {
        return Err(SettldError::validation(
            "VALIDATION_AMOUNT_INVALID",
            format!("amount must be a positive integer, got {amount}"),
        ));
    }
    Ok(())
}

fn checked(wallet: AgentWallet) -> Result<AgentWallet, SettldError> {
    if !wallet.is_balanced() {
        return Err(SettldError::internal(format!(
            "wallet {} violated the balance invariant",
            wallet.agent_id
        )));
    }
    Ok(wallet)
}

/// Credit funds into `available`
pub fn credit(
    wallet: &AgentWallet,
    amount: i64,
    at: DateTime<Utc>,
) -> Result<AgentWallet, SettldError> {
    require_positive(amount)?;
    let mut next = wallet.clone();
    next.available_cents = next
        .available_cents
        .checked_add(amount)
        .ok_or_else(|| SettldError::internal("wallet credit overflow"))?;
    next.total_credited_cents = next
        .total_credited_cents
        .checked_add(amount)
        .ok_or_else(|| SettldError::internal("wallet credit overflow"))?;
    next.updated_at = at;
    checked(next)
}

/// Move funds from `available` into `escrowLocked`
pub fn lock(
    wallet: &AgentWallet,
    amount: i64,
    at: DateTime<Utc>,
) -> Result<AgentWallet, SettldError> {
    require_positive(amount)?;
    if amount > wallet.available_cents {
        return Err(SettldError::InsufficientWalletBalance {
            available: wallet.available_cents,
            requested: amount,
        });
    }
    let mut next = wallet.clone();
    next.available_cents -= amount;
    next.escrow_locked_cents += amount;
    next.updated_at = at;
    checked(next)
}

/// Move funds from `escrowLocked` back into `available`
pub fn refund(
    wallet: &AgentWallet,
    amount: i64,
    at: DateTime<Utc>,
) -> Result<AgentWallet, SettldError> {
    require_positive(amount)?;
    if amount > wallet.escrow_locked_cents {
        return Err(SettldError::InsufficientWalletBalance {
            available: wallet.escrow_locked_cents,
            requested: amount,
        });
    }
    let mut next = wallet.clone();
    next.escrow_locked_cents -= amount;
    next.available_cents += amount;
    next.updated_at = at;
    checked(next)
}

/// Settle escrowed funds to the payee: debits the payer's escrow and
/// credits the payee's available balance
pub fn release(
    payer: &AgentWallet,
    payee: &AgentWallet,
    amount: i64,
    at: DateTime<Utc>,
) -> Result<ReleaseOutcome, SettldError> {
    require_positive(amount)?;
    if amount > payer.escrow_locked_cents {
        return Err(SettldError::InsufficientWalletBalance {
            available: payer.escrow_locked_cents,
            requested: amount,
        });
    }
    let mut next_payer = payer.clone();
    next_payer.escrow_locked_cents -= amount;
    next_payer.total_debited_cents += amount;
    next_payer.updated_at = at;

    let mut next_payee = payee.clone();
    next_payee.available_cents += amount;
    next_payee.total_credited_cents += amount;
    next_payee.updated_at = at;

    Ok(ReleaseOutcome {
        payer_wallet: checked(next_payer)?,
        payee_wallet: checked(next_payee)?,
    })
}

/// Resolve one locked amount as a release/refund split.
/// `released + refunded` must equal `locked_cents`, the escrow being
/// resolved (a wallet can carry several concurrent locks, so the total
/// `escrowLockedCents` is not the bound). The degenerate release-only and
/// refund-only cases are allowed; anything that would leave part of the
/// lock stranded is rejected before any wallet moves.
pub fn split_release(
    payer: &AgentWallet,
    payee: &AgentWallet,
    locked_cents: i64,
    released_cents: i64,
    refunded_cents: i64,
    at: DateTime<Utc>,
) -> Result<SplitOutcome, SettldError> {
    if released_cents < 0 || refunded_cents < 0 {
        return Err(SettldError::validation(
            "VALIDATION_AMOUNT_INVALID",
            "split amounts must be non-negative",
        ));
    }
    require_positive(locked_cents)?;
    if released_cents + refunded_cents != locked_cents {
        return Err(SettldError::validation(
            "VALIDATION_AMOUNT_INVALID",
            format!(
                "split {released_cents} + {refunded_cents} must equal the locked amount {locked_cents}"
            ),
        ));
    }
    if locked_cents > payer.escrow_locked_cents {
        return Err(SettldError::InsufficientWalletBalance {
            available: payer.escrow_locked_cents,
            requested: locked_cents,
        });
    }

    let mut next_payer = payer.clone();
    let mut next_payee = payee.clone();

    if released_cents > 0 {
        let outcome = release(&next_payer, &next_payee, released_cents, at)?;
        next_payer = outcome.payer_wallet;
        next_payee = outcome.payee_wallet;
    }
    if refunded_cents > 0 {
        next_payer = refund(&next_payer, refunded_cents, at)?;
    }

    Ok(SplitOutcome {
        payer_wallet: next_payer,
        payee_wallet: next_payee,
        released_cents,
        refunded_cents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use settld_types::{AgentId, TenantId};

    fn wallet() -> AgentWallet {
        AgentWallet::new(TenantId::new(), AgentId::new(), "USD", Utc::now())
    }

    fn funded(amount: i64) -> AgentWallet {
        credit(&wallet(), amount, Utc::now()).unwrap()
    }

    #[test]
    fn credit_increases_available_and_total_credited() {
        let w = funded(5000);
        assert_eq!(w.available_cents, 5000);
        assert_eq!(w.total_credited_cents, 5000);
        assert!(w.is_balanced());
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let w = wallet();
        assert!(credit(&w, 0, Utc::now()).is_err());
        assert!(credit(&w, -5, Utc::now()).is_err());
        assert!(lock(&funded(100), 0, Utc::now()).is_err());
    }

    #[test]
    fn lock_moves_funds_into_escrow() {
        let w = lock(&funded(5000), 1250, Utc::now()).unwrap();
        assert_eq!(w.available_cents, 3750);
        assert_eq!(w.escrow_locked_cents, 1250);
        assert!(w.is_balanced());
    }

    #[test]
    fn overdraw_lock_fails_and_leaves_the_input_untouched() {
        let w = funded(100);
        let before = w.clone();
        let err = lock(&w, 200, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_WALLET_BALANCE");
        assert_eq!(w, before);
    }

    #[test]
    fn refund_returns_escrow_to_available() {
        let locked = lock(&funded(1000), 400, Utc::now()).unwrap();
        let refunded = refund(&locked, 400, Utc::now()).unwrap();
        assert_eq!(refunded.available_cents, 1000);
        assert_eq!(refunded.escrow_locked_cents, 0);
        assert!(refunded.is_balanced());
    }

    #[test]
    fn release_moves_escrow_to_the_payee() {
        let payer = lock(&funded(5000), 1250, Utc::now()).unwrap();
        let payee = wallet();
        let outcome = release(&payer, &payee, 1250, Utc::now()).unwrap();

        assert_eq!(outcome.payer_wallet.available_cents, 3750);
        assert_eq!(outcome.payer_wallet.escrow_locked_cents, 0);
        assert_eq!(outcome.payer_wallet.total_debited_cents, 1250);
        assert_eq!(outcome.payee_wallet.available_cents, 1250);
        assert_eq!(outcome.payee_wallet.total_credited_cents, 1250);
        assert!(outcome.payer_wallet.is_balanced());
        assert!(outcome.payee_wallet.is_balanced());
    }

    #[test]
    fn split_conserves_the_locked_amount() {
        let payer = lock(&funded(1000), 1000, Utc::now()).unwrap();
        let payee = wallet();
        let outcome = split_release(&payer, &payee, 1000, 400, 600, Utc::now()).unwrap();

        assert_eq!(outcome.payer_wallet.escrow_locked_cents, 0);
        assert_eq!(outcome.payer_wallet.available_cents, 600);
        assert_eq!(outcome.payee_wallet.available_cents, 400);
        assert_eq!(
            outcome.released_cents + outcome.refunded_cents,
            1000,
        );
        assert!(outcome.payer_wallet.is_balanced());
        assert!(outcome.payee_wallet.is_balanced());
    }

    #[test]
    fn degenerate_splits_hold() {
        let payer = lock(&funded(500), 500, Utc::now()).unwrap();
        let payee = wallet();

        let release_only = split_release(&payer, &payee, 500, 500, 0, Utc::now()).unwrap();
        assert_eq!(release_only.payee_wallet.available_cents, 500);

        let refund_only = split_release(&payer, &payee, 500, 0, 500, Utc::now()).unwrap();
        assert_eq!(refund_only.payer_wallet.available_cents, 500);
        assert_eq!(refund_only.payee_wallet.available_cents, 0);
    }

    #[test]
    fn split_that_strands_escrow_is_rejected() {
        let payer = lock(&funded(1000), 1000, Utc::now()).unwrap();
        let payee = wallet();

        // 400 + 500 leaves 100 of the lock unresolved
        let err = split_release(&payer, &payee, 1000, 400, 500, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_AMOUNT_INVALID");

        // overshooting the lock is rejected the same way
        assert!(split_release(&payer, &payee, 1000, 700, 400, Utc::now()).is_err());

        // resolving more than the wallet holds in escrow fails closed
        let err = split_release(&payer, &payee, 2000, 1000, 1000, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_WALLET_BALANCE");

        // the inputs are untouched on every rejection
        assert_eq!(payer.escrow_locked_cents, 1000);
        assert!(payer.is_balanced());
    }

    #[test]
    fn release_beyond_escrow_fails() {
        let payer = lock(&funded(300), 300, Utc::now()).unwrap();
        let payee = wallet();
        assert!(release(&payer, &payee, 400, Utc::now()).is_err());
    }
}
