pub mod levels;
pub mod refresher;
pub mod store;

pub use levels::{camarilla, LevelTable};
pub use refresher::{PeriodStatus, PivotRefresher, PreviousOhlc, PreviousOhlcSource, RefresherStatus, RestPreviousOhlcSource};
pub use store::{min_acceptable_symbol_count, PivotStore, Snapshot};
