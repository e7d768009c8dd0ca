use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    agent::ChatAgent,
    arguments::KernelArguments,
    conversation::{ChatMessage, Role},
    function::{FunctionError, KernelFunction},
    interpreter::{ConversionError, ResultInterpreter, TextInterpreter},
};

use super::{ARGUMENT_KEY_AGENTS, ARGUMENT_KEY_HISTORY};

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("No agents to select from")]
    EmptyRoster,
    #[error("Strategy unable to determine selection result")]
    Undetermined,
    #[error("Strategy selected `{name}`, which is not part of the chat")]
    Invalid { name: String },
    #[error("Selection function error: {0}")]
    FunctionError(#[from] FunctionError),
    #[error("Selection result conversion error: {0}")]
    ConversionError(#[from] ConversionError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Decides which agent speaks next.
pub trait SelectionStrategy: Send + Sync {
    /// Pick the next speaker from `agents`, in the order they joined the chat.
    fn next<'a>(
        &'a self,
        agents: &'a [Arc<dyn ChatAgent>],
        history: &'a [ChatMessage],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Arc<dyn ChatAgent>, SelectionError>>;
}

/// Round-robin turn taking in join order.
///
/// The rotation is read off the history: the agent after the most recent
/// roster member to speak goes next, the first agent if none has spoken yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialSelectionStrategy;

impl SequentialSelectionStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for SequentialSelectionStrategy {
    fn next<'a>(
        &'a self,
        agents: &'a [Arc<dyn ChatAgent>],
        history: &'a [ChatMessage],
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Arc<dyn ChatAgent>, SelectionError>> {
        Box::pin(async move { next_in_rotation(agents, history) })
    }
}

fn next_in_rotation(
    agents: &[Arc<dyn ChatAgent>],
    history: &[ChatMessage],
) -> Result<Arc<dyn ChatAgent>, SelectionError> {
    if agents.is_empty() {
        return Err(SelectionError::EmptyRoster);
    }

    let names: Vec<String> = agents.iter().map(|agent| agent.name()).collect();
    let last_speaker = history
        .iter()
        .rev()
        .filter(|message| message.role == Role::Assistant)
        .find_map(|message| {
            let author = message.author_name.as_deref()?;
            names.iter().position(|name| name == author)
        });

    let index = last_speaker.map_or(0, |index| (index + 1) % agents.len());
    Ok(Arc::clone(&agents[index]))
}

/// Lets a [KernelFunction], typically a prompt evaluated by a model, name the
/// next speaker.
///
/// The function receives the configured base arguments plus
/// [ARGUMENT_KEY_AGENTS] and [ARGUMENT_KEY_HISTORY]. Its result is
/// interpreted as an agent name and matched exactly against the roster.
pub struct KernelFunctionSelectionStrategy {
    function: Arc<dyn KernelFunction>,
    arguments: KernelArguments,
    result_interpreter: Arc<dyn ResultInterpreter<String>>,
}

impl KernelFunctionSelectionStrategy {
    pub fn new(function: Arc<dyn KernelFunction>) -> Self {
        Self {
            function,
            arguments: KernelArguments::new(),
            result_interpreter: Arc::new(TextInterpreter::<String>::new()),
        }
    }

    /// Base arguments merged into every invocation.
    pub fn with_arguments(self, arguments: KernelArguments) -> Self {
        Self { arguments, ..self }
    }

    pub fn with_result_interpreter(
        self,
        interpreter: impl ResultInterpreter<String> + 'static,
    ) -> Self {
        Self {
            result_interpreter: Arc::new(interpreter),
            ..self
        }
    }

    pub fn function(&self) -> &Arc<dyn KernelFunction> {
        &self.function
    }

    pub fn arguments(&self) -> &KernelArguments {
        &self.arguments
    }

    fn build_arguments(
        &self,
        agents: &[Arc<dyn ChatAgent>],
        history: &[ChatMessage],
    ) -> Result<KernelArguments, SelectionError> {
        let names = agents
            .iter()
            .map(|agent| agent.name())
            .collect::<Vec<_>>()
            .join(",");

        let mut arguments = self.arguments.clone();
        arguments.insert(ARGUMENT_KEY_AGENTS, names);
        arguments.insert(ARGUMENT_KEY_HISTORY, serde_json::to_string(history)?);
        Ok(arguments)
    }
}

impl SelectionStrategy for KernelFunctionSelectionStrategy {
    fn next<'a>(
        &'a self,
        agents: &'a [Arc<dyn ChatAgent>],
        history: &'a [ChatMessage],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Arc<dyn ChatAgent>, SelectionError>> {
        Box::pin(async move {
            if agents.is_empty() {
                return Err(SelectionError::EmptyRoster);
            }

            let arguments = self.build_arguments(agents, history)?;
            let result = self.function.invoke(arguments, cancel.clone()).await?;

            let Some(name) = self.result_interpreter.interpret(&result)? else {
                return Err(SelectionError::Undetermined);
            };
            tracing::debug!(function = %result.function_name(), selected = %name, "selection function answered");

            match agents.iter().find(|agent| agent.name() == name) {
                Some(agent) => Ok(Arc::clone(agent)),
                None => Err(SelectionError::Invalid { name }),
            }
        })
    }
}

/// A [SelectionStrategy] backed by a closure, see [selection_fn].
pub struct FnSelectionStrategy<F> {
    f: F,
}

/// Build a synchronous custom [SelectionStrategy].
pub fn selection_fn<F>(f: F) -> FnSelectionStrategy<F>
where
    F: Fn(&[Arc<dyn ChatAgent>], &[ChatMessage]) -> Result<Arc<dyn ChatAgent>, SelectionError>
        + Send
        + Sync,
{
    FnSelectionStrategy { f }
}

impl<F> SelectionStrategy for FnSelectionStrategy<F>
where
    F: Fn(&[Arc<dyn ChatAgent>], &[ChatMessage]) -> Result<Arc<dyn ChatAgent>, SelectionError>
        + Send
        + Sync,
{
    fn next<'a>(
        &'a self,
        agents: &'a [Arc<dyn ChatAgent>],
        history: &'a [ChatMessage],
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Arc<dyn ChatAgent>, SelectionError>> {
        Box::pin(async move {
            if agents.is_empty() {
                return Err(SelectionError::EmptyRoster);
            }
            (self.f)(agents, history)
        })
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::always;

    use crate::{
        conversation::ChatHistory,
        function::{FunctionResult, MockKernelFunction, NativeFunction},
        interpreter::{DefaultValueInterpreter, interpreter_fn},
        testing::roster,
    };

    use super::*;

    fn answering(answer: Option<&'static str>) -> Arc<dyn KernelFunction> {
        let mut function = MockKernelFunction::new();
        function.expect_invoke().times(1).returning(move |_, _| {
            let result = match answer {
                Some(text) => FunctionResult::new("select", text.to_owned()),
                None => FunctionResult::empty("select"),
            };
            Box::pin(async move { Ok(result) })
        });
        Arc::new(function)
    }

    #[tokio::test]
    async fn test_function_result_selects_matching_agent() {
        let agents = roster(&["A", "B", "C"]);
        let strategy = KernelFunctionSelectionStrategy::new(answering(Some("B")));

        let agent = strategy
            .next(&agents, &[], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(agent.name(), "B");
    }

    #[tokio::test]
    async fn test_function_receives_roster_history_and_base_arguments() {
        let agents = roster(&["Writer", "Reviewer"]);
        let mut history = ChatHistory::new();
        history.push(Role::User, None, "Draft a slogan".into());

        let mut function = MockKernelFunction::new();
        function
            .expect_invoke()
            .withf(|arguments, _| {
                arguments.get_text(ARGUMENT_KEY_AGENTS).as_deref() == Some("Writer,Reviewer")
                    && arguments
                        .get_text(ARGUMENT_KEY_HISTORY)
                        .is_some_and(|history| history.contains("Draft a slogan"))
                    && arguments.get_text("style").as_deref() == Some("terse")
            })
            .times(1)
            .returning(|_, _| {
                Box::pin(async { Ok(FunctionResult::new("select", "Reviewer".to_owned())) })
            });

        let strategy = KernelFunctionSelectionStrategy::new(Arc::new(function))
            .with_arguments(KernelArguments::new().with("style", "terse"));

        let agent = strategy
            .next(&agents, history.messages(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(agent.name(), "Reviewer");
        assert!(!strategy.arguments().contains_key(ARGUMENT_KEY_AGENTS));
    }

    #[tokio::test]
    async fn test_unknown_name_is_invalid() {
        let agents = roster(&["A", "B", "C"]);
        let strategy = KernelFunctionSelectionStrategy::new(answering(Some("Z")));

        let err = strategy
            .next(&agents, &[], &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, SelectionError::Invalid { name } if name == "Z"));
    }

    #[tokio::test]
    async fn test_names_match_case_sensitively() {
        let agents = roster(&["A", "B"]);
        let strategy = KernelFunctionSelectionStrategy::new(answering(Some("b")));

        let err = strategy
            .next(&agents, &[], &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, SelectionError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_empty_result_is_undetermined() {
        let agents = roster(&["A", "B", "C"]);
        let strategy = KernelFunctionSelectionStrategy::new(answering(None));

        let err = strategy
            .next(&agents, &[], &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, SelectionError::Undetermined));
    }

    #[tokio::test]
    async fn test_default_interpreter_supplies_fallback_agent() {
        let agents = roster(&["A", "B", "C"]);
        let strategy = KernelFunctionSelectionStrategy::new(answering(None))
            .with_result_interpreter(DefaultValueInterpreter::new("C".to_owned()));

        let agent = strategy
            .next(&agents, &[], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(agent.name(), "C");
    }

    fn replying_blank() -> Arc<dyn KernelFunction> {
        Arc::new(NativeFunction::new("select", |_: &KernelArguments| {
            Ok::<_, FunctionError>(String::new())
        }))
    }

    #[tokio::test]
    async fn test_blank_string_reply_is_undetermined() {
        let agents = roster(&["A", "B", "C"]);
        let cancel = CancellationToken::new();

        let strict = KernelFunctionSelectionStrategy::new(replying_blank());
        let err = strict.next(&agents, &[], &cancel).await.err().unwrap();
        assert!(matches!(err, SelectionError::Undetermined));

        let fallback = KernelFunctionSelectionStrategy::new(replying_blank())
            .with_result_interpreter(DefaultValueInterpreter::new("C".to_owned()));
        let agent = fallback.next(&agents, &[], &cancel).await.unwrap();
        assert_eq!(agent.name(), "C");
    }

    #[tokio::test]
    async fn test_custom_interpreter_reads_string_reply() {
        let agents = roster(&["Writer", "Reviewer"]);
        let strategy = KernelFunctionSelectionStrategy::new(answering(Some("NEXT: Reviewer")))
            .with_result_interpreter(interpreter_fn(|text: &str| {
                Ok::<_, ConversionError>(
                    text.strip_prefix("NEXT:").map(|name| name.trim().to_owned()),
                )
            }));

        let agent = strategy
            .next(&agents, &[], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(agent.name(), "Reviewer");
    }

    #[tokio::test]
    async fn test_function_failure_propagates() {
        let mut function = MockKernelFunction::new();
        function
            .expect_invoke()
            .with(always(), always())
            .returning(|_, _| {
                Box::pin(async { Err(FunctionError::Invocation("model offline".to_owned())) })
            });
        let strategy = KernelFunctionSelectionStrategy::new(Arc::new(function));

        let err = strategy
            .next(&roster(&["A"]), &[], &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, SelectionError::FunctionError(FunctionError::Invocation(_))));
    }

    #[tokio::test]
    async fn test_empty_roster_skips_function() {
        let mut function = MockKernelFunction::new();
        function.expect_invoke().never();
        let strategy = KernelFunctionSelectionStrategy::new(Arc::new(function));

        let err = strategy
            .next(&[], &[], &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, SelectionError::EmptyRoster));
    }

    #[tokio::test]
    async fn test_sequential_rotation_follows_history() {
        let agents = roster(&["A", "B", "C"]);
        let strategy = SequentialSelectionStrategy::new();
        let cancel = CancellationToken::new();
        let mut history = ChatHistory::new();

        let first = strategy.next(&agents, history.messages(), &cancel).await.unwrap();
        assert_eq!(first.name(), "A");

        history.push(Role::User, None, "hi".into());
        history.push(Role::Assistant, Some("A".to_owned()), "hello".into());
        let second = strategy.next(&agents, history.messages(), &cancel).await.unwrap();
        assert_eq!(second.name(), "B");

        history.push(Role::Assistant, Some("C".to_owned()), "hey".into());
        history.push(Role::User, None, "anyone?".into());
        let wrapped = strategy.next(&agents, history.messages(), &cancel).await.unwrap();
        assert_eq!(wrapped.name(), "A");
    }

    #[tokio::test]
    async fn test_sequential_ignores_authors_outside_roster() {
        let agents = roster(&["A", "B"]);
        let mut history = ChatHistory::new();
        history.push(Role::Assistant, Some("B".to_owned()), "first".into());
        history.push(Role::Assistant, Some("Guest".to_owned()), "second".into());

        let agent = SequentialSelectionStrategy
            .next(&agents, history.messages(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(agent.name(), "A");
    }

    #[tokio::test]
    async fn test_closure_strategy() {
        let agents = roster(&["A", "B"]);
        let strategy = selection_fn(|agents: &[Arc<dyn ChatAgent>], _: &[ChatMessage]| {
            agents.last().map(Arc::clone).ok_or(SelectionError::EmptyRoster)
        });

        let agent = strategy
            .next(&agents, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(agent.name(), "B");
    }
}
