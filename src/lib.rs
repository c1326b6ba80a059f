pub mod engine;
pub mod export;
pub mod grouper;
pub mod identity;
pub mod io;
pub mod registry;
pub mod report;
pub mod rows;
pub mod scanner;
pub mod stats;
pub mod ticks;

pub mod prelude {
    pub use crate::engine::{Engine, EngineError, EngineOptions};
    pub use crate::identity::{Identity, IdentityKey, LicenseTier, Session, Violation};
    pub use crate::registry::Registry;
    pub use crate::rows::{RowFilter, SubscriptionRow, TransactionRow};
    pub use crate::ticks::{Tick, TickMode};
}
