use std::sync::Arc;

use futures::future::BoxFuture;
use regex::RegexSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    agent::ChatAgent,
    arguments::KernelArguments,
    conversation::ChatMessage,
    function::{FunctionError, KernelFunction},
    interpreter::{ConversionError, DefaultValueInterpreter, ResultInterpreter},
};

use super::{ARGUMENT_KEY_AGENT, ARGUMENT_KEY_HISTORY, in_scope};

/// Iteration cap of a chat invocation unless the settings or the strategy say otherwise.
pub const DEFAULT_MAXIMUM_ITERATIONS: usize = 99;

#[derive(Debug, Error)]
pub enum TerminationError {
    #[error("Termination function error: {0}")]
    FunctionError(#[from] FunctionError),
    #[error("Termination result conversion error: {0}")]
    ConversionError(#[from] ConversionError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Decides whether a group chat is done after `agent` spoke.
pub trait TerminationStrategy: Send + Sync {
    fn should_terminate<'a>(
        &'a self,
        agent: &'a dyn ChatAgent,
        history: &'a [ChatMessage],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool, TerminationError>>;

    /// Whether turns taken by `agent` are evaluated at all.
    fn applies_to(&self, _agent: &dyn ChatAgent) -> bool {
        true
    }

    /// Iteration cap used when the chat settings do not set one.
    fn default_maximum_iterations(&self) -> usize {
        DEFAULT_MAXIMUM_ITERATIONS
    }
}

/// Never terminates; a chat using it takes a single turn per invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTerminationStrategy;

impl TerminationStrategy for DefaultTerminationStrategy {
    fn should_terminate<'a>(
        &'a self,
        _agent: &'a dyn ChatAgent,
        _history: &'a [ChatMessage],
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool, TerminationError>> {
        Box::pin(async { Ok(false) })
    }

    fn default_maximum_iterations(&self) -> usize {
        1
    }
}

/// Lets a [KernelFunction] decide whether the chat is done.
///
/// The function receives the base arguments plus [ARGUMENT_KEY_AGENT] and
/// [ARGUMENT_KEY_HISTORY]. Results that cannot be read as a `bool` count as
/// "keep going".
pub struct KernelFunctionTerminationStrategy {
    function: Arc<dyn KernelFunction>,
    arguments: KernelArguments,
    result_interpreter: Arc<dyn ResultInterpreter<bool>>,
    agents: Option<Vec<String>>,
}

impl KernelFunctionTerminationStrategy {
    pub fn new(function: Arc<dyn KernelFunction>) -> Self {
        Self {
            function,
            arguments: KernelArguments::new(),
            result_interpreter: Arc::new(DefaultValueInterpreter::new(false)),
            agents: None,
        }
    }

    pub fn with_arguments(self, arguments: KernelArguments) -> Self {
        Self { arguments, ..self }
    }

    pub fn with_result_interpreter(self, interpreter: impl ResultInterpreter<bool> + 'static) -> Self {
        Self {
            result_interpreter: Arc::new(interpreter),
            ..self
        }
    }

    /// Only evaluate after turns of the named agents.
    pub fn with_agents<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agents: Some(names.into_iter().map(Into::into).collect()),
            ..self
        }
    }
}

impl TerminationStrategy for KernelFunctionTerminationStrategy {
    fn should_terminate<'a>(
        &'a self,
        agent: &'a dyn ChatAgent,
        history: &'a [ChatMessage],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool, TerminationError>> {
        Box::pin(async move {
            let mut arguments = self.arguments.clone();
            arguments.insert(ARGUMENT_KEY_AGENT, agent.name());
            arguments.insert(ARGUMENT_KEY_HISTORY, serde_json::to_string(history)?);

            let result = self.function.invoke(arguments, cancel.clone()).await?;
            match self.result_interpreter.interpret(&result)? {
                Some(done) => Ok(done),
                None => {
                    tracing::warn!(function = %result.function_name(), "termination undetermined, continuing");
                    Ok(false)
                }
            }
        })
    }

    fn applies_to(&self, agent: &dyn ChatAgent) -> bool {
        in_scope(self.agents.as_deref(), agent)
    }
}

/// Terminates once the latest message matches any of a set of patterns.
pub struct RegexTerminationStrategy {
    patterns: RegexSet,
    agents: Option<Vec<String>>,
}

impl RegexTerminationStrategy {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            patterns: RegexSet::new(patterns)?,
            agents: None,
        })
    }

    pub fn with_agents<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agents: Some(names.into_iter().map(Into::into).collect()),
            ..self
        }
    }
}

impl TerminationStrategy for RegexTerminationStrategy {
    fn should_terminate<'a>(
        &'a self,
        _agent: &'a dyn ChatAgent,
        history: &'a [ChatMessage],
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool, TerminationError>> {
        let matched = history
            .last()
            .is_some_and(|message| self.patterns.is_match(&message.text()));
        Box::pin(async move { Ok(matched) })
    }

    fn applies_to(&self, agent: &dyn ChatAgent) -> bool {
        in_scope(self.agents.as_deref(), agent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateCondition {
    /// Every applicable strategy must agree.
    All,
    /// One applicable strategy is enough.
    Any,
}

/// Combines several strategies, evaluated one after another in order.
pub struct AggregatorTerminationStrategy {
    strategies: Vec<Arc<dyn TerminationStrategy>>,
    condition: AggregateCondition,
    agents: Option<Vec<String>>,
}

impl AggregatorTerminationStrategy {
    pub fn new(strategies: Vec<Arc<dyn TerminationStrategy>>, condition: AggregateCondition) -> Self {
        Self {
            strategies,
            condition,
            agents: None,
        }
    }

    pub fn with_agents<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agents: Some(names.into_iter().map(Into::into).collect()),
            ..self
        }
    }
}

impl TerminationStrategy for AggregatorTerminationStrategy {
    fn should_terminate<'a>(
        &'a self,
        agent: &'a dyn ChatAgent,
        history: &'a [ChatMessage],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool, TerminationError>> {
        Box::pin(async move {
            let mut evaluated = 0;
            for strategy in &self.strategies {
                if !strategy.applies_to(agent) {
                    continue;
                }
                evaluated += 1;

                let done = strategy.should_terminate(agent, history, cancel).await?;
                match (self.condition, done) {
                    (AggregateCondition::Any, true) => return Ok(true),
                    (AggregateCondition::All, false) => return Ok(false),
                    _ => {}
                }
            }

            Ok(self.condition == AggregateCondition::All && evaluated > 0)
        })
    }

    fn applies_to(&self, agent: &dyn ChatAgent) -> bool {
        in_scope(self.agents.as_deref(), agent)
    }
}

/// A [TerminationStrategy] backed by a closure, see [termination_fn].
pub struct FnTerminationStrategy<F> {
    f: F,
    agents: Option<Vec<String>>,
}

/// Build a synchronous custom [TerminationStrategy].
pub fn termination_fn<F>(f: F) -> FnTerminationStrategy<F>
where
    F: Fn(&dyn ChatAgent, &[ChatMessage]) -> bool + Send + Sync,
{
    FnTerminationStrategy { f, agents: None }
}

impl<F> FnTerminationStrategy<F> {
    pub fn with_agents<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agents: Some(names.into_iter().map(Into::into).collect()),
            ..self
        }
    }
}

impl<F> TerminationStrategy for FnTerminationStrategy<F>
where
    F: Fn(&dyn ChatAgent, &[ChatMessage]) -> bool + Send + Sync,
{
    fn should_terminate<'a>(
        &'a self,
        agent: &'a dyn ChatAgent,
        history: &'a [ChatMessage],
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool, TerminationError>> {
        let done = (self.f)(agent, history);
        Box::pin(async move { Ok(done) })
    }

    fn applies_to(&self, agent: &dyn ChatAgent) -> bool {
        in_scope(self.agents.as_deref(), agent)
    }
}
