//! Core domain primitives for the genealogy ledger.
//!
//! The crate holds the pieces every other crate in the workspace agrees on:
//!
//! * [`model`]: users, plans, investments, commission rows and wallet
//!   entries.
//! * [`money`]: decimal currency helpers (two places, half-even rounding).
//! * [`schedule`]: the per-level commission table expressed in basis points.
//! * [`lifecycle`]: the investment state machine and return calculation.
//! * [`tree`]: the serializable genealogy tree record shared by the graph
//!   builder and the layout code.
//!
//! Nothing here touches storage; the ledger store and the referral engine
//! build on top of these types.

pub mod lifecycle;
pub mod model;
pub mod money;
pub mod schedule;
pub mod tree;

mod error;

pub use error::CoreError;
pub use model::{
    CommissionTransaction, EntryKind, Investment, InvestmentId, InvestmentStatus, LedgerEntry,
    PaymentProvider, Plan, PlanId, User, UserId,
};
pub use rust_decimal::Decimal;
pub use schedule::CommissionSchedule;
pub use tree::TreeNode;
