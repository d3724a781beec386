pub mod stats;
pub mod task;

pub use stats::{book_from_value, DailyStats, StatsBook};
pub use task::{Task, TaskPriority};
