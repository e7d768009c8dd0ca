use std::sync::Arc;

use agent_groupchat::{
    agent::{AgentError, ChatAgent},
    arguments::KernelArguments,
    conversation::{ChatMessage, Content, Role},
    function::{FunctionError, NativeFunction},
    group_chat::{AgentGroupChat, ChatError, ChatState, GroupChatSettings, TerminationReason},
    strategy::{
        ARGUMENT_KEY_AGENTS, ARGUMENT_KEY_HISTORY, KernelFunctionSelectionStrategy,
        RegexTerminationStrategy, SequentialSelectionStrategy, termination_fn,
    },
};
use futures::{StreamExt, stream::BoxStream};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Answers from a fixed menu, one reply per turn.
struct MenuHost;

impl ChatAgent for MenuHost {
    fn id(&self) -> String {
        "menu-host".to_owned()
    }

    fn name(&self) -> String {
        "Host".to_owned()
    }

    fn description(&self) -> String {
        "Answers questions about the menu".to_owned()
    }

    fn invoke(
        &self,
        history: Arc<[ChatMessage]>,
        _cancel: CancellationToken,
    ) -> BoxStream<'static, Result<Content, AgentError>> {
        let question = history.last().map(ChatMessage::text).unwrap_or_default();
        let answer = match question.as_str() {
            "What is the special soup?" => "Clam chowder",
            "What is the special drink?" => "Chai tea",
            "Thank you" => "You're welcome!",
            _ => "Welcome! Ask me about today's specials.",
        };
        futures::stream::iter([Ok(Content::from(answer))]).boxed()
    }
}

const INPUTS: [&str; 4] = [
    "Hello",
    "What is the special soup?",
    "What is the special drink?",
    "Thank you",
];

fn menu_chat() -> Result<AgentGroupChat, ChatError> {
    let settings = GroupChatSettings::builder()
        .selection(SequentialSelectionStrategy)
        .termination(termination_fn(|_: &dyn ChatAgent, history: &[ChatMessage]| {
            history
                .iter()
                .filter(|message| message.role == Role::User)
                .count()
                >= INPUTS.len()
        }))
        .maximum_iterations(1)
        .build();

    let host: Arc<dyn ChatAgent> = Arc::new(MenuHost);
    AgentGroupChat::with_agents([host], settings)
}

#[tokio::test]
async fn test_host_answers_every_question() -> anyhow::Result<()> {
    init_tracing();
    let mut chat = menu_chat()?;
    let cancel = CancellationToken::new();

    for input in INPUTS {
        assert!(!chat.is_complete());
        chat.add_user_message(input)?;

        let replies = chat.invoke(&cancel).await?;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].author_name.as_deref(), Some("Host"));
    }

    let messages = chat.history().messages();
    assert_eq!(messages.len(), 8);
    for (ordinal, message) in messages.iter().enumerate() {
        let expected = if ordinal % 2 == 0 { Role::User } else { Role::Assistant };
        assert_eq!(message.role, expected);
        assert_eq!(message.ordinal, ordinal);
    }
    assert_eq!(messages[3].text(), "Clam chowder");
    assert_eq!(messages[5].text(), "Chai tea");

    assert!(chat.is_complete());
    assert_eq!(chat.state(), ChatState::Terminated(TerminationReason::Completed));
    assert!(matches!(
        chat.invoke(&cancel).await,
        Err(ChatError::Terminated(TerminationReason::Completed))
    ));

    Ok(())
}

#[tokio::test]
async fn test_history_exports_as_json() -> anyhow::Result<()> {
    let mut chat = menu_chat()?;
    chat.add_user_message("What is the special soup?")?;
    chat.invoke(&CancellationToken::new()).await?;

    let messages: Vec<serde_json::Value> = serde_json::from_str(&chat.history().to_json()?)?;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["author_name"], "Host");
    assert_eq!(messages[1]["role"], "assistant");
    Ok(())
}

/// Writes drafts, or approves once it has seen enough of them.
struct Reviewed {
    name: &'static str,
}

impl ChatAgent for Reviewed {
    fn id(&self) -> String {
        format!("{}-1", self.name)
    }

    fn name(&self) -> String {
        self.name.to_owned()
    }

    fn description(&self) -> String {
        String::new()
    }

    fn invoke(
        &self,
        history: Arc<[ChatMessage]>,
        _cancel: CancellationToken,
    ) -> BoxStream<'static, Result<Content, AgentError>> {
        let drafts = history
            .iter()
            .filter(|message| message.is_from_agent("Writer"))
            .count();
        let reply = match self.name {
            "Writer" => format!("Draft {}", drafts + 1),
            _ if drafts >= 2 => "APPROVED".to_owned(),
            _ => "Try again".to_owned(),
        };
        futures::stream::iter([Ok(Content::Text(reply))]).boxed()
    }
}

#[tokio::test]
async fn test_function_selection_with_reviewer_approval() -> anyhow::Result<()> {
    init_tracing();

    let picker = NativeFunction::new("pick", |arguments: &KernelArguments| {
        assert_eq!(arguments.get_text(ARGUMENT_KEY_AGENTS).as_deref(), Some("Writer,Reviewer"));

        let history = arguments.get_text(ARGUMENT_KEY_HISTORY).unwrap_or_default();
        let history: Vec<ChatMessage> = serde_json::from_str(&history)
            .map_err(|err| FunctionError::Invocation(err.to_string()))?;
        let next = match history.last().and_then(|message| message.author_name.as_deref()) {
            Some("Writer") => "Reviewer",
            _ => "Writer",
        };
        Ok(next.to_owned())
    });

    let settings = GroupChatSettings::builder()
        .selection(KernelFunctionSelectionStrategy::new(Arc::new(picker)))
        .termination(RegexTerminationStrategy::new(["^APPROVED$"])?.with_agents(["Reviewer"]))
        .maximum_iterations(10)
        .build();
    let agents: [Arc<dyn ChatAgent>; 2] = [
        Arc::new(Reviewed { name: "Writer" }),
        Arc::new(Reviewed { name: "Reviewer" }),
    ];
    let mut chat = AgentGroupChat::with_agents(agents, settings)?;
    chat.add_user_message("Write a slogan")?;

    let produced = chat.invoke(&CancellationToken::new()).await?;

    let texts: Vec<String> = produced.iter().map(ChatMessage::text).collect();
    assert_eq!(texts, ["Draft 1", "Try again", "Draft 2", "APPROVED"]);
    assert!(chat.is_complete());
    Ok(())
}
