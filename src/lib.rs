//! Strategy-driven group chats between LLM agents.
//!
//! At a high level, the crate provides a few major components:
//!
//! * Tools for [working with agents][agents], including
//!   [configuration][agent_config] and a [`rig` backed implementation][rig_chat_agent].
//! * An append-only [chat history][conversation] shared by everyone in a chat.
//! * [Callable functions][function] and [result interpreters][interpreter] that turn
//!   model output into typed decisions.
//! * Pluggable [selection and termination strategies][strategy] deciding who speaks
//!   next and when the conversation is over.
//! * The [`AgentGroupChat`] orchestrator driving the turn loop, with [invoked filters][filter]
//!   that can keep individual agent messages out of the history.
//!
//! [agents]: #working-with-agents
//! [agent_config]: crate::agent::AgentConfig
//! [rig_chat_agent]: crate::agent::RigChatAgent
//! [conversation]: crate::conversation
//! [function]: crate::function
//! [interpreter]: crate::interpreter
//! [strategy]: crate::strategy
//! [filter]: crate::filter
//! [`AgentGroupChat`]: crate::group_chat::AgentGroupChat
//!
//! # A Tour
//!
//! ## Working With Agents
//!
//! * The [`ChatAgent`] trait, implemented by every chat participant.
//! * The [`AgentConfig`] struct and [`AgentConfigBuilder`], for configuring agent behavior.
//! * [`LLMProvider`], which turns a config into a ready agent on a hosted model.
//!
//! [`ChatAgent`]: crate::agent::ChatAgent
//! [`AgentConfig`]: crate::agent::AgentConfig
//! [`AgentConfigBuilder`]: crate::agent::AgentConfigBuilder
//! [`LLMProvider`]: crate::llm_provider::LLMProvider
//!
//! ```rust,no_run
//! use agent_groupchat::{agent::AgentConfig, llm_provider::LLMProvider};
//!
//! # fn main() -> Result<(), agent_groupchat::llm_provider::LLMProviderError> {
//! let config = AgentConfig::builder()
//!     .agent_name("Host")
//!     .description("Answers questions about the menu")
//!     .instructions("Answer questions about the menu. The special soup is clam chowder.")
//!     .temperature(0.2)
//!     .build();
//!
//! let host = LLMProvider::deepseek("deepseek-chat").build_agent(config)?;
//! assert_eq!(host.name(), "Host");
//! # Ok(())
//! # }
//! ```
//!
//! ## Functions and Interpreters
//!
//! Model-driven strategies call a [`KernelFunction`], usually a prompt template
//! evaluated by a model, and read its [`FunctionResult`] through a
//! [`ResultInterpreter`].
//!
//! [`KernelFunction`]: crate::function::KernelFunction
//! [`FunctionResult`]: crate::function::FunctionResult
//! [`ResultInterpreter`]: crate::interpreter::ResultInterpreter
//!
//! ```rust
//! use agent_groupchat::{
//!     function::FunctionResult,
//!     interpreter::{DefaultValueInterpreter, ResultInterpreter, TextInterpreter},
//! };
//!
//! let answer = FunctionResult::new("decide", "TRUE".to_owned());
//! assert_eq!(TextInterpreter::<bool>::new().interpret(&answer)?, Some(true));
//!
//! let vague = FunctionResult::new("decide", "maybe".to_owned());
//! assert_eq!(DefaultValueInterpreter::new(false).interpret(&vague)?, Some(false));
//! # Ok::<(), agent_groupchat::interpreter::ConversionError>(())
//! ```
//!
//! ## Running a Group Chat
//!
//! [`GroupChatSettings`] pair a selection strategy with a termination strategy.
//! The defaults are round robin turn taking and a single turn per invocation.
//!
//! [`GroupChatSettings`]: crate::group_chat::GroupChatSettings
//!
//! ```rust,no_run
//! use agent_groupchat::{
//!     group_chat::{AgentGroupChat, GroupChatSettings},
//!     llm_provider::LLMProvider,
//!     strategy::{KernelFunctionSelectionStrategy, KernelFunctionTerminationStrategy},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(
//! #     agents: Vec<std::sync::Arc<dyn agent_groupchat::agent::ChatAgent>>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let provider = LLMProvider::openai("gpt-4o-mini");
//! let picker = provider.prompt_function(
//!     "select",
//!     "Choose who speaks next from {{$_agents_}}. Reply with the name only.\n{{$_history_}}",
//! )?;
//! let judge = provider.prompt_function(
//!     "approve",
//!     "Has {{$_agent_}} approved the copy? Reply true or false.\n{{$_history_}}",
//! )?;
//!
//! let settings = GroupChatSettings::builder()
//!     .selection(KernelFunctionSelectionStrategy::new(picker))
//!     .termination(KernelFunctionTerminationStrategy::new(judge).with_agents(["Reviewer"]))
//!     .maximum_iterations(10)
//!     .build();
//!
//! let mut chat = AgentGroupChat::with_agents(agents, settings)?;
//! chat.add_user_message("Write a slogan for an eco-friendly hand planer")?;
//! chat.invoke(&CancellationToken::new()).await?;
//! println!("{}", chat.history());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod arguments;
pub mod conversation;
pub mod filter;
pub mod function;
pub mod group_chat;
pub mod interpreter;
pub mod key_encoder;
pub mod llm_provider;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use rig;
