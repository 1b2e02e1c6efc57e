//! Payment arithmetic shared by the job and invoice ledgers.

use rust_decimal::Decimal;

use crate::entities::job::PaymentStatus;
use crate::errors::ServiceError;

/// Mode recorded on job ledger entries mirrored from invoice payments.
pub const INVOICE_MIRROR_MODE: &str = "Cash";

/// `Paid` once the total is covered (a zero total is covered from the start),
/// `Partially Paid` for anything in between, `Pending` otherwise.
pub fn payment_status(paid: Decimal, total: Decimal) -> PaymentStatus {
    if paid >= total {
        PaymentStatus::Paid
    } else if paid > Decimal::ZERO {
        PaymentStatus::PartiallyPaid
    } else {
        PaymentStatus::Pending
    }
}

pub fn remaining_balance(total: Decimal, paid: Decimal) -> Decimal {
    (total - paid).max(Decimal::ZERO)
}

/// Portion of `requested` that fits into `remaining`. Never negative.
pub fn capped_amount(requested: Decimal, remaining: Decimal) -> Decimal {
    requested.min(remaining).max(Decimal::ZERO)
}

pub fn ensure_positive_amount(amount: Decimal) -> Result<(), ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Payment amount must be greater than zero, got {}",
            amount
        )));
    }
    Ok(())
}
