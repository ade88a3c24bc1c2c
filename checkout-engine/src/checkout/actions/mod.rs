//! Command actions
//!
//! One [`CommandHandler`](crate::checkout::traits::CommandHandler)
//! implementation per checkout operation. Actions mutate tables through
//! the [`CommandContext`](crate::checkout::traits::CommandContext) and
//! never commit; the manager owns the transaction boundary.

pub mod cancel_order;
pub mod settle_order;
pub mod sync_draft;

pub use cancel_order::{ApproveCancellationAction, CancelOrderAction};
pub use settle_order::SettleOrderAction;
pub use sync_draft::SyncDraftAction;
