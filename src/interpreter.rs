//! Turning an opaque [FunctionResult] into a typed decision.
//!
//! Results with a textual form (strings and JSON values) always go through
//! [ResultInterpreter::process_text]. Any other value is returned untouched
//! when it already is of the target type.
//!
//! Conversion failures are surfaced as [ConversionError] by the strict
//! [TextInterpreter]. A [DefaultValueInterpreter] absorbs them and answers
//! with its configured default instead, logging what it discarded.

use std::{any::type_name, fmt::Debug, marker::PhantomData};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::function::FunctionResult;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Cannot convert `{text}` to {type_name}: {detail}")]
    Parse {
        type_name: &'static str,
        text: String,
        detail: String,
    },
    #[error("Cannot deserialize {type_name}, source: {source}")]
    Deserialize {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A type a function result can be converted into.
///
/// The provided conversion deserializes JSON, so a plain
/// `impl Interpretable for MyDecision {}` is enough for structured results.
pub trait Interpretable: DeserializeOwned + Clone + Send + Sync + 'static {
    /// Convert raw text. `Ok(None)` means the text carries no value.
    fn convert_text(text: &str) -> Result<Option<Self>, ConversionError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(text)
            .map(Some)
            .map_err(|source| ConversionError::Deserialize {
                type_name: type_name::<Self>(),
                source,
            })
    }
}

impl Interpretable for String {
    fn convert_text(text: &str) -> Result<Option<Self>, ConversionError> {
        Ok((!text.trim().is_empty()).then(|| text.to_owned()))
    }
}

impl Interpretable for bool {
    fn convert_text(text: &str) -> Result<Option<Self>, ConversionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else if trimmed.eq_ignore_ascii_case("true") {
            Ok(Some(true))
        } else if trimmed.eq_ignore_ascii_case("false") {
            Ok(Some(false))
        } else {
            Err(ConversionError::Parse {
                type_name: "bool",
                text: trimmed.to_owned(),
                detail: "expected `true` or `false`".to_owned(),
            })
        }
    }
}

macro_rules! impl_interpretable_from_str {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Interpretable for $ty {
                fn convert_text(text: &str) -> Result<Option<Self>, ConversionError> {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        return Ok(None);
                    }
                    trimmed
                        .parse::<$ty>()
                        .map(Some)
                        .map_err(|err| ConversionError::Parse {
                            type_name: stringify!($ty),
                            text: trimmed.to_owned(),
                            detail: err.to_string(),
                        })
                }
            }
        )*
    };
}

impl_interpretable_from_str!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, char);

/// JSON text is parsed, anything else becomes a JSON string.
impl Interpretable for serde_json::Value {
    fn convert_text(text: &str) -> Result<Option<Self>, ConversionError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(
            serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_owned())),
        ))
    }
}

/// Interprets a [FunctionResult] as a `T`.
pub trait ResultInterpreter<T: Interpretable>: Send + Sync {
    /// Translate the text content of a result.
    fn process_text(&self, text: &str) -> Result<Option<T>, ConversionError>;

    /// Interpret a result.
    ///
    /// Text is always processed, so empty replies and custom hooks apply to
    /// string results too. A non-textual native `T` is returned untouched.
    fn interpret(&self, result: &FunctionResult) -> Result<Option<T>, ConversionError> {
        if let Some(text) = result.text() {
            return self.process_text(&text);
        }
        if let Some(value) = result.value_as::<T>() {
            return Ok(Some(value));
        }
        self.process_text("")
    }
}

/// Strict interpretation with [Interpretable::convert_text].
pub struct TextInterpreter<T>(PhantomData<fn() -> T>);

impl<T> TextInterpreter<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TextInterpreter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Interpretable> ResultInterpreter<T> for TextInterpreter<T> {
    fn process_text(&self, text: &str) -> Result<Option<T>, ConversionError> {
        T::convert_text(text)
    }
}

/// Falls back to a fixed value whenever the text yields nothing usable.
pub struct DefaultValueInterpreter<T> {
    default: T,
}

impl<T: Interpretable> DefaultValueInterpreter<T> {
    pub fn new(default: T) -> Self {
        Self { default }
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }
}

impl<T: Interpretable + Debug> ResultInterpreter<T> for DefaultValueInterpreter<T> {
    fn process_text(&self, text: &str) -> Result<Option<T>, ConversionError> {
        match T::convert_text(text) {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => {
                tracing::debug!(default = ?self.default, "empty function result, using default");
                Ok(Some(self.default.clone()))
            }
            Err(err) => {
                tracing::warn!(error = %err, default = ?self.default, "unconvertible function result, using default");
                Ok(Some(self.default.clone()))
            }
        }
    }
}

/// A [ResultInterpreter] backed by a closure, see [interpreter_fn].
pub struct FnInterpreter<F> {
    f: F,
}

/// Build a [ResultInterpreter] from a text conversion closure.
pub fn interpreter_fn<F>(f: F) -> FnInterpreter<F> {
    FnInterpreter { f }
}

impl<T, F> ResultInterpreter<T> for FnInterpreter<F>
where
    T: Interpretable,
    F: Fn(&str) -> Result<Option<T>, ConversionError> + Send + Sync,
{
    fn process_text(&self, text: &str) -> Result<Option<T>, ConversionError> {
        (self.f)(text)
    }
}
