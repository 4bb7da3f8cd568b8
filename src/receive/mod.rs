pub mod engine;
pub mod extract;

pub use engine::{
    receive, ApplyAction, AppliedConfig, ConflictStrategy, ReceiveOptions, ReceiveOutcome,
};
