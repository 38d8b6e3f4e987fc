use rust_decimal::Decimal;
use thiserror::Error;

use crate::model::InvestmentStatus;

/// Canonical error type for domain rules.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Unknown user, plan, investment or referral code.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// A lifecycle transition the state machine does not allow.
    #[error("investment {id} cannot move from {from} to {to}")]
    InvalidState {
        id: String,
        from: InvestmentStatus,
        to: InvestmentStatus,
    },

    /// Commission rows already exist for the investment. Callers treat this
    /// as a completed no-op.
    #[error("commissions already distributed for investment {0}")]
    DuplicateCommission(String),

    /// Amount is not a positive value with at most two decimal places.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient funds for user {user}: available {available}, requested {requested}")]
    InsufficientFunds {
        user: String,
        available: Decimal,
        requested: Decimal,
    },

    #[error("amount {amount} is outside the bounds of plan {plan}")]
    AmountOutOfPlanBounds { plan: String, amount: Decimal },

    /// Commission table rejected at load time.
    #[error("invalid commission schedule: {0}")]
    InvalidSchedule(String),

    /// A stored or supplied label that names no known variant.
    #[error("unrecognized {kind} {value:?}")]
    Unrecognized { kind: &'static str, value: String },

    /// A plan duration pushes the end date past the supported calendar.
    #[error("duration of plan {0} puts the end date out of calendar range")]
    DateOutOfRange(String),

    /// A provider reference already booked for a different user.
    #[error("{provider} reference {reference} is already booked for another user")]
    ReferenceConflict { provider: String, reference: String },

    /// The sponsor relation loops back on itself.
    #[error("sponsor chain of user {0} contains a cycle")]
    SponsorCycle(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn unrecognized(kind: &'static str, value: impl ToString) -> Self {
        CoreError::Unrecognized {
            kind,
            value: value.to_string(),
        }
    }
}
