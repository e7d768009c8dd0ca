//! Callable functions used as strategy criteria.
//!
//! A [KernelFunction] receives [KernelArguments] and produces an opaque
//! [FunctionResult]. Strategies never look inside the result themselves, they
//! hand it to a [ResultInterpreter](crate::interpreter::ResultInterpreter).

use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    sync::{Arc, LazyLock},
};

use futures::future::BoxFuture;
use regex::{Captures, Regex};
use rig::completion::{Prompt, PromptError};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::arguments::KernelArguments;

#[cfg(test)]
use mockall::automock;

static TEMPLATE_VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\$([A-Za-z0-9_]+)\s*\}\}").expect("template variable pattern is valid")
});

#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("Prompt error: {0}")]
    PromptError(#[from] PromptError),
    #[error("Missing argument `{0}` required by the template")]
    MissingArgument(String),
    #[error("Function invocation failed: {0}")]
    Invocation(String),
    #[error("Function invocation cancelled")]
    Cancelled,
}

/// The opaque output of a [KernelFunction].
#[derive(Clone)]
pub struct FunctionResult {
    function_name: String,
    value: Option<Arc<dyn Any + Send + Sync>>,
}

impl FunctionResult {
    pub fn new<V: Any + Send + Sync>(function_name: impl Into<String>, value: V) -> Self {
        Self {
            function_name: function_name.into(),
            value: Some(Arc::new(value)),
        }
    }

    /// A result that carries no value at all.
    pub fn empty(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            value: None,
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// The value, if it is exactly of type `T`.
    pub fn value_as<T: Clone + 'static>(&self) -> Option<T> {
        self.value.as_deref()?.downcast_ref::<T>().cloned()
    }

    /// The textual form of the value.
    ///
    /// Strings are returned as is and JSON values render as JSON (string
    /// values unquoted). Any other value has no textual form.
    pub fn text(&self) -> Option<String> {
        let value = self.value.as_deref()?;
        if let Some(text) = value.downcast_ref::<String>() {
            return Some(text.clone());
        }
        if let Some(text) = value.downcast_ref::<&'static str>() {
            return Some((*text).to_owned());
        }
        match value.downcast_ref::<Value>()? {
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl Debug for FunctionResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionResult")
            .field("function_name", &self.function_name)
            .field("text", &self.text())
            .field("has_value", &self.has_value())
            .finish()
    }
}

/// Something a strategy can invoke: a prompt evaluated by a model, a Rust
/// closure, a remote tool.
///
/// Implementations must observe `cancel` where they block on I/O.
#[cfg_attr(test, automock)]
pub trait KernelFunction: Send + Sync {
    fn name(&self) -> String;

    fn invoke(
        &self,
        arguments: KernelArguments,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<FunctionResult, FunctionError>>;
}

/// A prompt template evaluated by a completion model.
///
/// Template variables are written `{{$name}}` and are substituted with the
/// textual value of the matching argument.
pub struct PromptFunction<P> {
    name: String,
    template: String,
    model: Arc<P>,
}

impl<P> PromptFunction<P>
where
    P: Prompt + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, template: impl Into<String>, model: P) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            model: Arc::new(model),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

impl<P> KernelFunction for PromptFunction<P>
where
    P: Prompt + Send + Sync + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn invoke(
        &self,
        arguments: KernelArguments,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<FunctionResult, FunctionError>> {
        let name = self.name.clone();
        let model = Arc::clone(&self.model);
        let rendered = render_template(&self.template, &arguments);

        Box::pin(async move {
            let prompt = rendered?;
            tracing::debug!(function = %name, prompt_len = prompt.len(), "invoking prompt function");

            let completion = async { model.prompt(prompt).await };
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FunctionError::Cancelled),
                reply = completion => reply?,
            };
            Ok(FunctionResult::new(name, reply))
        })
    }
}

type NativeHandler = dyn Fn(&KernelArguments) -> Result<FunctionResult, FunctionError> + Send + Sync;

/// A [KernelFunction] backed by a Rust closure.
pub struct NativeFunction {
    name: String,
    handler: Arc<NativeHandler>,
}

impl NativeFunction {
    /// Wrap a closure whose return value becomes the [FunctionResult] value.
    pub fn new<F, V>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&KernelArguments) -> Result<V, FunctionError> + Send + Sync + 'static,
        V: Any + Send + Sync,
    {
        let name = name.into();
        let result_name = name.clone();
        Self {
            name,
            handler: Arc::new(move |arguments: &KernelArguments| {
                handler(arguments).map(|value| FunctionResult::new(result_name.as_str(), value))
            }),
        }
    }
}

impl KernelFunction for NativeFunction {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn invoke(
        &self,
        arguments: KernelArguments,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<FunctionResult, FunctionError>> {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(FunctionError::Cancelled);
            }
            handler(&arguments)
        })
    }
}

/// Substitute `{{$name}}` variables with argument text.
pub fn render_template(template: &str, arguments: &KernelArguments) -> Result<String, FunctionError> {
    let mut missing = None;
    let rendered = TEMPLATE_VARIABLE.replace_all(template, |captures: &Captures<'_>| {
        let key = &captures[1];
        arguments.get_text(key).unwrap_or_else(|| {
            missing.get_or_insert_with(|| key.to_owned());
            String::new()
        })
    });

    match missing {
        Some(key) => Err(FunctionError::MissingArgument(key)),
        None => Ok(rendered.into_owned()),
    }
}
