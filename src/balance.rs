//! Balance maintenance.
//!
//! Every transaction write goes through one of the `apply_*` functions, which
//! change the transaction row and the owning account's `current_balance`
//! inside the caller's unit of work. The caller commits; an error return
//! leaves the unit to be dropped, which rolls both changes back.

use dompet_core::{
    models::write::TransactionDraft, Account, AccountId, CategoryId, Transaction, TransactionId,
    UnitOfWork,
};
use rust_decimal::Decimal;

use crate::error::LedgerError;

/// Checks the fields of a draft that need no store access.
pub fn validate_draft(draft: &TransactionDraft) -> Result<(), LedgerError> {
    if draft.account_id <= 0 {
        return Err(LedgerError::validation("account_id must be a positive integer"));
    }
    if let Some(category_id) = draft.category_id {
        if category_id <= 0 {
            return Err(LedgerError::validation("category_id must be a positive integer"));
        }
    }
    if draft.amount <= Decimal::ZERO {
        return Err(LedgerError::validation("amount must be greater than zero"));
    }
    Ok(())
}

fn lock_existing_account(unit: &mut dyn UnitOfWork, id: AccountId) -> Result<Account, LedgerError> {
    unit.lock_account(id)?
        .ok_or_else(|| LedgerError::not_found("account", id))
}

fn require_category(unit: &mut dyn UnitOfWork, id: Option<CategoryId>) -> Result<(), LedgerError> {
    match id {
        Some(id) if !unit.category_exists(id)? => Err(LedgerError::not_found("category", id)),
        _ => Ok(()),
    }
}

fn lock_existing_transaction(unit: &mut dyn UnitOfWork, id: TransactionId) -> Result<Transaction, LedgerError> {
    unit.lock_transaction(id)?
        .ok_or_else(|| LedgerError::not_found("transaction", id))
}

/// Inserts a transaction and applies its delta to the account.
pub fn apply_create(unit: &mut dyn UnitOfWork, draft: &TransactionDraft) -> Result<TransactionId, LedgerError> {
    validate_draft(draft)?;
    lock_existing_account(unit, draft.account_id)?;
    require_category(unit, draft.category_id)?;

    let id = unit.insert_transaction(draft)?;
    let balance = unit.adjust_balance(draft.account_id, draft.delta())?;
    tracing::debug!(transaction_id = id, account_id = draft.account_id, %balance, "transaction created");
    Ok(id)
}

/// Deletes a transaction and reverses its stored effect. Returns the
/// deleted row.
pub fn apply_delete(unit: &mut dyn UnitOfWork, id: TransactionId) -> Result<Transaction, LedgerError> {
    let old = lock_existing_transaction(unit, id)?;
    lock_existing_account(unit, old.account_id)?;

    unit.delete_transaction(id)?;
    let balance = unit.adjust_balance(old.account_id, -old.delta())?;
    tracing::debug!(transaction_id = id, account_id = old.account_id, %balance, "transaction deleted");
    Ok(old)
}

/// Replaces every field of a transaction. The old effect is reversed on the
/// old account before the new effect lands on the new account. Returns the
/// row as it was before the update.
pub fn apply_update(
    unit: &mut dyn UnitOfWork,
    id: TransactionId,
    draft: &TransactionDraft,
) -> Result<Transaction, LedgerError> {
    validate_draft(draft)?;
    let old = lock_existing_transaction(unit, id)?;

    // ascending id order, so concurrent cross-account moves cannot deadlock
    let (first, second) = if old.account_id <= draft.account_id {
        (old.account_id, draft.account_id)
    } else {
        (draft.account_id, old.account_id)
    };
    lock_existing_account(unit, first)?;
    if second != first {
        lock_existing_account(unit, second)?;
    }
    require_category(unit, draft.category_id)?;

    unit.adjust_balance(old.account_id, -old.delta())?;
    unit.update_transaction(id, draft)?;
    let balance = unit.adjust_balance(draft.account_id, draft.delta())?;
    tracing::debug!(
        transaction_id = id,
        from_account = old.account_id,
        to_account = draft.account_id,
        %balance,
        "transaction updated"
    );
    Ok(old)
}
