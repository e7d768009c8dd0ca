//! Turn-taking and termination strategies for [AgentGroupChat](crate::group_chat::AgentGroupChat).
//!
//! Both kinds of strategy are read-only with respect to the roster and the
//! history they are shown, and hold no per-turn state of their own.

pub mod selection;
pub mod termination;

pub use selection::{
    FnSelectionStrategy, KernelFunctionSelectionStrategy, SelectionError, SelectionStrategy,
    SequentialSelectionStrategy, selection_fn,
};
pub use termination::{
    AggregateCondition, AggregatorTerminationStrategy, DefaultTerminationStrategy,
    FnTerminationStrategy, KernelFunctionTerminationStrategy, RegexTerminationStrategy,
    TerminationError, TerminationStrategy, termination_fn,
};

use crate::agent::ChatAgent;

/// Well-known argument carrying the comma separated agent names.
pub const ARGUMENT_KEY_AGENTS: &str = "_agents_";
/// Well-known argument carrying the name of the agent that just spoke.
pub const ARGUMENT_KEY_AGENT: &str = "_agent_";
/// Well-known argument carrying the JSON serialized chat history.
pub const ARGUMENT_KEY_HISTORY: &str = "_history_";

/// Restricts a strategy to a set of agent names. `None` admits everyone.
pub(crate) fn in_scope(scope: Option<&[String]>, agent: &dyn ChatAgent) -> bool {
    match scope {
        Some(names) => {
            let name = agent.name();
            names.iter().any(|candidate| *candidate == name)
        }
        None => true,
    }
}
