pub mod blocklist;
pub mod kv;
pub mod state;
pub mod tasks;
