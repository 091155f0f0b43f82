//! Subagent Manager — recursive Tool Loop delegation under admission control.

pub mod manager;

pub use manager::{
    ExecutionResolver, SubagentCallback, SubagentLimits, SubagentManager, SubagentTaskSnapshot, TaskStatus,
};
