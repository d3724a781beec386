pub mod enforcer;
pub mod hosts;
pub mod normalizer;
pub mod rules;

pub use enforcer::{MemoryFilter, NetworkFilter, RuleEnforcer};
pub use hosts::HostsFileFilter;
pub use normalizer::{normalize_all, normalize_domain};
pub use rules::{compile_rules, BlockRule, ResourceType};
