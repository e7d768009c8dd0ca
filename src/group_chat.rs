use std::{fmt::Display, future::Future, sync::Arc};

use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    agent::{AgentError, ChatAgent},
    conversation::{ChatHistory, ChatMessage, Content, Role},
    filter::{InvokedContext, InvokedFilter},
    key_encoder::generate_hash,
    strategy::{
        DefaultTerminationStrategy, SelectionError, SelectionStrategy, SequentialSelectionStrategy,
        TerminationError, TerminationStrategy,
    },
};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Agent `{0}` is already part of the chat")]
    DuplicateAgent(String),
    #[error("Group chat has no agents")]
    EmptyRoster,
    #[error("Group chat is terminated: {0}")]
    Terminated(TerminationReason),
    #[error("Selection error: {0}")]
    SelectionError(#[from] SelectionError),
    #[error("Agent `{agent}` failed: {source}")]
    AgentError {
        agent: String,
        #[source]
        source: AgentError,
    },
    #[error("Termination error: {0}")]
    TerminationError(#[from] TerminationError),
    #[error("Group chat cancelled during {0}")]
    Cancelled(ChatStage),
}

impl ChatError {
    /// The stage of the loop that produced the error, if it came from one.
    pub fn stage(&self) -> Option<ChatStage> {
        match self {
            ChatError::SelectionError(_) => Some(ChatStage::Selection),
            ChatError::AgentError { .. } => Some(ChatStage::AgentTurn),
            ChatError::TerminationError(_) => Some(ChatStage::Termination),
            ChatError::Cancelled(stage) => Some(*stage),
            ChatError::DuplicateAgent(_) | ChatError::EmptyRoster | ChatError::Terminated(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStage {
    Selection,
    AgentTurn,
    Termination,
}

impl Display for ChatStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatStage::Selection => write!(f, "selection"),
            ChatStage::AgentTurn => write!(f, "agent turn"),
            ChatStage::Termination => write!(f, "termination"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The termination strategy decided the conversation is over.
    Completed,
    Failed(ChatStage),
    Cancelled(ChatStage),
}

impl Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Completed => write!(f, "completed"),
            TerminationReason::Failed(stage) => write!(f, "failed during {stage}"),
            TerminationReason::Cancelled(stage) => write!(f, "cancelled during {stage}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatState {
    #[default]
    Idle,
    AwaitingSelection,
    AgentTurn,
    AwaitingTermination,
    Terminated(TerminationReason),
}

/// How a group chat picks speakers and decides it is done.
#[derive(Clone)]
pub struct GroupChatSettings {
    pub selection: Arc<dyn SelectionStrategy>,
    pub termination: Arc<dyn TerminationStrategy>,
    /// Overrides the termination strategy's iteration cap.
    pub maximum_iterations: Option<usize>,
    /// Reopen a completed chat on the next call instead of rejecting it.
    pub automatic_reset: bool,
    /// Run on every item an agent produces, before it is appended.
    pub invoked_filters: Vec<Arc<dyn InvokedFilter>>,
}

impl GroupChatSettings {
    pub fn builder() -> GroupChatSettingsBuilder {
        GroupChatSettingsBuilder {
            settings: GroupChatSettings::default(),
        }
    }

    /// Number of turns a single [AgentGroupChat::invoke] may take.
    pub fn effective_maximum_iterations(&self) -> usize {
        self.maximum_iterations
            .unwrap_or_else(|| self.termination.default_maximum_iterations())
    }
}

impl Default for GroupChatSettings {
    fn default() -> Self {
        Self {
            selection: Arc::new(SequentialSelectionStrategy),
            termination: Arc::new(DefaultTerminationStrategy),
            maximum_iterations: None,
            automatic_reset: false,
            invoked_filters: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct GroupChatSettingsBuilder {
    settings: GroupChatSettings,
}

impl GroupChatSettingsBuilder {
    pub fn selection(mut self, strategy: impl SelectionStrategy + 'static) -> Self {
        self.settings.selection = Arc::new(strategy);
        self
    }

    pub fn termination(mut self, strategy: impl TerminationStrategy + 'static) -> Self {
        self.settings.termination = Arc::new(strategy);
        self
    }

    pub fn maximum_iterations(mut self, maximum_iterations: usize) -> Self {
        self.settings.maximum_iterations = Some(maximum_iterations);
        self
    }

    pub fn automatic_reset(mut self, automatic_reset: bool) -> Self {
        self.settings.automatic_reset = automatic_reset;
        self
    }

    pub fn invoked_filter(mut self, filter: impl InvokedFilter + 'static) -> Self {
        self.settings.invoked_filters.push(Arc::new(filter));
        self
    }

    pub fn build(self) -> GroupChatSettings {
        self.settings
    }
}

/// A conversation between several agents, driven turn by turn.
///
/// Each iteration asks the selection strategy for a speaker, appends
/// everything that agent produces to the shared history, then asks the
/// termination strategy whether the chat is done. A chat that terminated
/// stays terminated, apart from a completed chat with
/// [GroupChatSettings::automatic_reset].
///
/// # Example
///
/// ```rust,no_run
/// use agent_groupchat::{
///     agent::AgentConfig,
///     group_chat::{AgentGroupChat, GroupChatSettings},
///     llm_provider::LLMProvider,
///     strategy::RegexTerminationStrategy,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = LLMProvider::openai("gpt-4o");
/// let writer = provider.build_agent(
///     AgentConfig::builder()
///         .agent_name("Writer")
///         .instructions("Write a one line slogan.")
///         .build(),
/// )?;
/// let reviewer = provider.build_agent(
///     AgentConfig::builder()
///         .agent_name("Reviewer")
///         .instructions("Reply APPROVED when the slogan is good, else critique it.")
///         .build(),
/// )?;
///
/// let settings = GroupChatSettings::builder()
///     .termination(RegexTerminationStrategy::new(["APPROVED"])?.with_agents(["Reviewer"]))
///     .maximum_iterations(10)
///     .build();
/// let mut chat = AgentGroupChat::with_agents([writer, reviewer], settings)?;
///
/// chat.add_user_message("A slogan for a soup kitchen")?;
/// for message in chat.invoke(&CancellationToken::new()).await? {
///     println!("{message}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct AgentGroupChat {
    agents: Vec<Arc<dyn ChatAgent>>,
    history: ChatHistory,
    settings: GroupChatSettings,
    state: ChatState,
}

impl AgentGroupChat {
    pub fn new(settings: GroupChatSettings) -> Self {
        Self {
            agents: Vec::new(),
            history: ChatHistory::new(),
            settings,
            state: ChatState::Idle,
        }
    }

    pub fn with_agents<I>(agents: I, settings: GroupChatSettings) -> Result<Self, ChatError>
    where
        I: IntoIterator<Item = Arc<dyn ChatAgent>>,
    {
        let mut chat = Self::new(settings);
        for agent in agents {
            chat.add_agent(agent)?;
        }
        Ok(chat)
    }

    /// Add an agent to the end of the roster. Names are unique within a chat.
    pub fn add_agent(&mut self, agent: Arc<dyn ChatAgent>) -> Result<(), ChatError> {
        let name = agent.name();
        if self.agents.iter().any(|existing| existing.name() == name) {
            return Err(ChatError::DuplicateAgent(name));
        }

        tracing::debug!(agent = %name, id = %agent.id(), "agent joined the chat");
        self.agents.push(agent);
        Ok(())
    }

    pub fn add_user_message(&mut self, content: impl Into<Content>) -> Result<&ChatMessage, ChatError> {
        self.add_message(Role::User, None, content)
    }

    pub fn add_message(
        &mut self,
        role: Role,
        author_name: Option<String>,
        content: impl Into<Content>,
    ) -> Result<&ChatMessage, ChatError> {
        self.ensure_open()?;
        Ok(self.history.push(role, author_name, content.into()))
    }

    /// Run the chat until it terminates or the iteration cap is reached.
    ///
    /// Returns the messages appended by this call. On error everything the
    /// agents produced before the failure stays in [Self::history].
    #[tracing::instrument(skip_all, fields(roster = %self.roster_key()))]
    pub async fn invoke(&mut self, cancel: &CancellationToken) -> Result<Vec<ChatMessage>, ChatError> {
        self.ensure_open()?;
        if self.agents.is_empty() {
            return Err(ChatError::EmptyRoster);
        }

        let start = self.history.len();
        let maximum_iterations = self.settings.effective_maximum_iterations();

        for iteration in 0..maximum_iterations {
            let agent = self.select_next(cancel).await?;
            tracing::debug!(iteration, agent = %agent.name(), "agent selected");

            self.run_turn(&agent, cancel).await?;
            if self.check_termination(agent.as_ref(), cancel).await? {
                break;
            }
        }

        if !self.is_complete() {
            tracing::debug!(maximum_iterations, "iteration limit reached");
            self.transition(ChatState::Idle);
        }
        Ok(self.history.messages()[start..].to_vec())
    }

    /// Give a single turn to `agent`, bypassing selection.
    ///
    /// The agent joins the roster if it is not already part of it.
    #[tracing::instrument(skip_all, fields(agent = %agent.name()))]
    pub async fn invoke_agent(
        &mut self,
        agent: Arc<dyn ChatAgent>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        self.ensure_open()?;
        self.join(&agent)?;

        let start = self.history.len();
        self.run_turn(&agent, cancel).await?;
        if !self.check_termination(agent.as_ref(), cancel).await? {
            self.transition(ChatState::Idle);
        }
        Ok(self.history.messages()[start..].to_vec())
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn agents(&self) -> &[Arc<dyn ChatAgent>] {
        &self.agents
    }

    pub fn settings(&self) -> &GroupChatSettings {
        &self.settings
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    /// Whether the termination strategy ended the conversation.
    pub fn is_complete(&self) -> bool {
        self.state == ChatState::Terminated(TerminationReason::Completed)
    }

    /// Stable key identifying the roster, by agent names in join order.
    pub fn roster_key(&self) -> String {
        generate_hash(self.agents.iter().map(|agent| agent.name()))
    }

    fn ensure_open(&mut self) -> Result<(), ChatError> {
        match self.state {
            ChatState::Terminated(TerminationReason::Completed) if self.settings.automatic_reset => {
                tracing::info!("reopening completed chat");
                self.transition(ChatState::Idle);
                Ok(())
            }
            ChatState::Terminated(reason) => Err(ChatError::Terminated(reason)),
            _ => Ok(()),
        }
    }

    fn join(&mut self, agent: &Arc<dyn ChatAgent>) -> Result<(), ChatError> {
        let name = agent.name();
        match self.agents.iter().find(|existing| existing.name() == name) {
            Some(existing) if existing.id() == agent.id() => Ok(()),
            Some(_) => Err(ChatError::DuplicateAgent(name)),
            None => self.add_agent(Arc::clone(agent)),
        }
    }

    fn transition(&mut self, next: ChatState) {
        tracing::debug!(from = ?self.state, to = ?next, "chat state changed");
        self.state = next;
    }

    async fn select_next(&mut self, cancel: &CancellationToken) -> Result<Arc<dyn ChatAgent>, ChatError> {
        self.transition(ChatState::AwaitingSelection);

        let outcome = guarded(
            cancel,
            self.settings
                .selection
                .next(&self.agents, self.history.messages(), cancel),
        )
        .await;

        match outcome {
            Some(Ok(agent)) => Ok(agent),
            Some(Err(err)) if !cancel.is_cancelled() => Err(self.fail(err.into())),
            _ => Err(self.fail(ChatError::Cancelled(ChatStage::Selection))),
        }
    }

    async fn run_turn(&mut self, agent: &Arc<dyn ChatAgent>, cancel: &CancellationToken) -> Result<(), ChatError> {
        self.transition(ChatState::AgentTurn);

        let name = agent.name();
        let mut contents = agent.invoke(self.history.snapshot(), cancel.clone());
        loop {
            let item = match guarded(cancel, contents.next()).await {
                Some(Some(item)) => item,
                Some(None) => return Ok(()),
                None => return Err(self.fail(ChatError::Cancelled(ChatStage::AgentTurn))),
            };

            match item {
                Ok(content) if self.is_suppressed(agent.as_ref(), &content) => {
                    tracing::debug!(agent = %name, "message suppressed by filter");
                }
                Ok(content) => {
                    let message = self.history.push(Role::Assistant, Some(name.clone()), content);
                    tracing::debug!(agent = %name, ordinal = message.ordinal, "message appended");
                }
                Err(AgentError::Cancelled) => {
                    return Err(self.fail(ChatError::Cancelled(ChatStage::AgentTurn)));
                }
                Err(_) if cancel.is_cancelled() => {
                    return Err(self.fail(ChatError::Cancelled(ChatStage::AgentTurn)));
                }
                Err(source) => {
                    return Err(self.fail(ChatError::AgentError {
                        agent: name,
                        source,
                    }));
                }
            }
        }
    }

    fn is_suppressed(&self, agent: &dyn ChatAgent, content: &Content) -> bool {
        let mut context = InvokedContext::new(agent, self.history.messages(), content);
        for filter in &self.settings.invoked_filters {
            filter.on_agent_invoked(&mut context);
        }
        context.is_suppressed()
    }

    /// Returns whether the chat completed, moving it to the terminated state if so.
    async fn check_termination(
        &mut self,
        agent: &dyn ChatAgent,
        cancel: &CancellationToken,
    ) -> Result<bool, ChatError> {
        self.transition(ChatState::AwaitingTermination);

        let termination = &self.settings.termination;
        if !termination.applies_to(agent) {
            return Ok(false);
        }

        let outcome = guarded(
            cancel,
            termination.should_terminate(agent, self.history.messages(), cancel),
        )
        .await;

        let done = match outcome {
            Some(Ok(done)) => done,
            Some(Err(err)) if !cancel.is_cancelled() => return Err(self.fail(err.into())),
            _ => return Err(self.fail(ChatError::Cancelled(ChatStage::Termination))),
        };

        if done {
            tracing::info!(agent = %agent.name(), messages = self.history.len(), "group chat completed");
            self.transition(ChatState::Terminated(TerminationReason::Completed));
        }
        Ok(done)
    }

    fn fail(&mut self, error: ChatError) -> ChatError {
        if let Some(stage) = error.stage() {
            let reason = if matches!(error, ChatError::Cancelled(_)) {
                TerminationReason::Cancelled(stage)
            } else {
                TerminationReason::Failed(stage)
            };
            tracing::warn!(%stage, error = %error, "group chat terminated");
            self.transition(ChatState::Terminated(reason));
        }
        error
    }
}

/// Race `future` against cancellation. `None` means the token fired first.
async fn guarded<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}
