//! Referral graph accounting and payout helpers.
//!
//! * [`graph`] materializes a user's downline as a bounded-depth
//!   [`TreeNode`](genealogy_core::TreeNode).
//! * [`commission`] walks the sponsor chain upward from an investor and
//!   writes one commission row per compensated ancestor.
//! * [`stats`] summarizes a built tree per level for dashboards.

pub mod commission;
pub mod graph;
pub mod stats;

pub use commission::{distribute_commissions, CommissionEngine};
pub use graph::{build_tree, DEFAULT_MAX_DEPTH};
pub use stats::{LevelStats, TeamStats};
