pub mod commands;
pub mod controller;
pub mod state;
pub mod wakeup;

pub use commands::{dispatch, dispatch_json, Command, Reply};
pub use controller::{Collaborators, FocusController, FocusEvent, StatusReport};
pub use state::{ConfigOverrides, SessionConfig, SessionMode, SessionState};
pub use wakeup::{
    FiredWakeup, ManualScheduler, TokioScheduler, WakeupScheduler, WakeupToken, WAKEUP_NAME,
};
