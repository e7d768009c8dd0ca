//! Model references for agents and prompt functions.
//!
//! Clients are created from the provider's usual environment variables
//! (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, ...), as `rig`'s `from_env`
//! constructors do. A missing variable panics inside `rig`.

use std::sync::Arc;

use rig::{
    agent::{Agent as RigAgent, AgentBuilder},
    completion::CompletionModel,
    providers::{
        anthropic,
        deepseek::{self, DeepSeekCompletionModel},
        gemini, openai, openrouter,
    },
};
use thiserror::Error;

use crate::{
    agent::{AgentConfig, ChatAgent, RigChatAgent},
    function::{KernelFunction, PromptFunction},
};

#[derive(Clone, Debug)]
pub enum LLMProvider {
    Anthropic(ModelConfig),
    DeepSeek(ModelConfig),
    Gemini(ModelConfig),
    OpenAI(ModelConfig),
    OpenRouter(ModelConfig),
}

macro_rules! impl_agent_builder {
    ($method:ident, $variant:ident, $client:ty, $model:ty) => {
        pub fn $method(&self) -> Result<AgentBuilder<$model>, LLMProviderError> {
            let LLMProvider::$variant(config) = self else {
                return Err(LLMProviderError::LLMProviderNotMatch);
            };
            let client = <$client>::from_env();
            Ok(client.agent(&config.model))
        }
    };
}

/// Declare the supported providers once. Each entry yields a
/// `get_<snake>_agent_builder` method and an arm of every dispatch below.
macro_rules! impl_llm_providers {
    ($($variant:ident as $snake:ident => $client:ty, $model:ty;)*) => {
        paste::paste! {
            impl LLMProvider {
                $(
                    impl_agent_builder!([<get_ $snake _agent_builder>], $variant, $client, $model);
                )*

                /// Build a chat participant on this model.
                ///
                /// The config's `model_name` is overwritten with this provider's model.
                pub fn build_agent(
                    &self,
                    config: AgentConfig,
                ) -> Result<Arc<dyn ChatAgent>, LLMProviderError> {
                    let config = AgentConfig {
                        model_name: self.get_config().model.clone(),
                        ..config
                    };

                    let agent: Arc<dyn ChatAgent> = match self {
                        $(
                            LLMProvider::$variant(_) => {
                                let rig_agent = configure(self.[<get_ $snake _agent_builder>]()?, &config);
                                Arc::new(RigChatAgent::new(config, rig_agent))
                            }
                        )*
                    };
                    Ok(agent)
                }

                /// Build a [PromptFunction] evaluated on this model, suitable as
                /// selection or termination criteria.
                pub fn prompt_function(
                    &self,
                    name: impl Into<String>,
                    template: impl Into<String>,
                ) -> Result<Arc<dyn KernelFunction>, LLMProviderError> {
                    let name = name.into();
                    let template = template.into();

                    let function: Arc<dyn KernelFunction> = match self {
                        $(
                            LLMProvider::$variant(_) => {
                                let model = self.[<get_ $snake _agent_builder>]()?.temperature(0.0).build();
                                Arc::new(PromptFunction::new(name, template, model))
                            }
                        )*
                    };
                    Ok(function)
                }
            }
        }
    };
}

impl LLMProvider {
    pub fn anthropic(model: impl Into<String>) -> Self {
        Self::Anthropic(ModelConfig::new(model))
    }

    pub fn deepseek(model: impl Into<String>) -> Self {
        Self::DeepSeek(ModelConfig::new(model))
    }

    pub fn gemini(model: impl Into<String>) -> Self {
        Self::Gemini(ModelConfig::new(model))
    }

    pub fn openai(model: impl Into<String>) -> Self {
        Self::OpenAI(ModelConfig::new(model))
    }

    pub fn openrouter(model: impl Into<String>) -> Self {
        Self::OpenRouter(ModelConfig::new(model))
    }

    pub fn get_config(&self) -> &ModelConfig {
        match self {
            LLMProvider::Anthropic(config)
            | LLMProvider::DeepSeek(config)
            | LLMProvider::Gemini(config)
            | LLMProvider::OpenAI(config)
            | LLMProvider::OpenRouter(config) => config,
        }
    }
}

impl_llm_providers! {
    Anthropic as anthropic => anthropic::Client, anthropic::completion::CompletionModel;
    DeepSeek as deep_seek => deepseek::Client, DeepSeekCompletionModel;
    Gemini as gemini => gemini::Client, gemini::completion::CompletionModel;
    OpenAI as open_ai => openai::Client, openai::CompletionModel;
    OpenRouter as open_router => openrouter::Client, openrouter::CompletionModel;
}

fn configure<M: CompletionModel>(builder: AgentBuilder<M>, config: &AgentConfig) -> RigAgent<M> {
    builder
        .preamble(&config.instructions)
        .temperature(config.temperature)
        .max_tokens(config.max_tokens)
        .build()
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub model: String,
    pub stream: bool,
}

impl ModelConfig {
    fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            stream: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LLMProviderError {
    #[error("LLM provider not match")]
    LLMProviderNotMatch,
}
