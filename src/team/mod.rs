//! Team Orchestrator — multi-member execution strategies over Tool Loops.

pub mod orchestrator;

pub use orchestrator::{MemberOutcome, Produces, TeamMember, TeamOrchestrator, TeamResult, TeamRunConfig, TeamStrategy};
