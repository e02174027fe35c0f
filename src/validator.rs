//! Synchronous and asynchronous validators.
//!
//! A validator maps a value to a set of failure reasons; an empty set (or
//! `None`) means the value passed. Asynchronous validators return a future of
//! the same shape. Such a future that never resolves leaves its field
//! `Pending` for good: that is a bug in the validator, and no timeout is
//! applied on its behalf.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::{json, Value};

/// Failure reason → detail.
pub type ValidationErrors = BTreeMap<String, Value>;

/// Reason recorded when an asynchronous validator fails with an error
/// instead of producing a result.
pub const ASYNC_VALIDATION_FAILED: &str = "asyncValidationFailed";

/// The deferred result of an asynchronous validator.
pub type ValidationFuture = BoxFuture<'static, anyhow::Result<Option<ValidationErrors>>>;

/// A synchronous validator.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value) -> Option<ValidationErrors>;
}

impl<F> Validator for F
    where F: Fn(&Value) -> Option<ValidationErrors> + Send + Sync
{
    fn validate(&self, value: &Value) -> Option<ValidationErrors> {
        self(value)
    }
}

/// An asynchronous validator.
pub trait AsyncValidator: Send + Sync {
    fn validate(&self, value: Value) -> ValidationFuture;
}

impl<F, Fut> AsyncValidator for F
    where F: Fn(Value) -> Fut + Send + Sync,
          Fut: Future<Output = anyhow::Result<Option<ValidationErrors>>> + Send + 'static,
{
    fn validate(&self, value: Value) -> ValidationFuture {
        self(value).boxed()
    }
}

/// Run every synchronous validator and merge their failures.
pub(crate) fn run_sync(validators: &[Arc<dyn Validator>], value: &Value) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    for validator in validators {
        if let Some(failures) = validator.validate(value) {
            errors.extend(failures);
        }
    }
    errors
}

/// Run every asynchronous validator concurrently and merge their failures.
///
/// The first validator error wins over any failure map.
pub(crate) async fn run_async(
    validators: Vec<Arc<dyn AsyncValidator>>,
    value: Value,
) -> anyhow::Result<ValidationErrors> {
    let outcomes = join_all(validators.iter().map(|v| v.validate(value.clone()))).await;
    let mut errors = ValidationErrors::new();
    for outcome in outcomes {
        if let Some(failures) = outcome? {
            errors.extend(failures);
        }
    }
    Ok(errors)
}

/// A failure map with a single reason.
pub fn failure(reason: &str, detail: Value) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.insert(reason.to_string(), detail);
    errors
}


/// Built-in validators.
pub mod validators {
    use serde_json::{json, Value};

    use super::{failure, ValidationErrors};

    fn is_empty(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    fn length(value: &Value) -> Option<usize> {
        match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Fails with `required` on null, empty strings and empty arrays.
    pub fn required() -> impl Fn(&Value) -> Option<ValidationErrors> + Send + Sync + 'static {
        |value: &Value| is_empty(value).then(|| failure("required", Value::Bool(true)))
    }

    /// Fails with `email` on a non-empty value that is not an address.
    pub fn email() -> impl Fn(&Value) -> Option<ValidationErrors> + Send + Sync + 'static {
        |value: &Value| {
            if is_empty(value) {
                return None;
            }
            let valid = value.as_str().map_or(false, looks_like_email);
            (!valid).then(|| failure("email", Value::Bool(true)))
        }
    }

    /// Fails with `minlength` when a non-empty value is shorter than `min`.
    pub fn min_length(min: usize) -> impl Fn(&Value) -> Option<ValidationErrors> + Send + Sync + 'static {
        move |value: &Value| {
            if is_empty(value) {
                return None;
            }
            length(value).filter(|&len| len < min).map(|len| failure(
                "minlength",
                json!({ "requiredLength": min, "actualLength": len }),
            ))
        }
    }

    /// Fails with `maxlength` when a value is longer than `max`.
    pub fn max_length(max: usize) -> impl Fn(&Value) -> Option<ValidationErrors> + Send + Sync + 'static {
        move |value: &Value| {
            length(value).filter(|&len| len > max).map(|len| failure(
                "maxlength",
                json!({ "requiredLength": max, "actualLength": len }),
            ))
        }
    }

    fn looks_like_email(s: &str) -> bool {
        if s.chars().any(char::is_whitespace) {
            return false;
        }
        let mut parts = s.splitn(2, '@');
        let (local, domain) = match (parts.next(), parts.next()) {
            (Some(local), Some(domain)) => (local, domain),
            _ => return false,
        };
        !local.is_empty()
            && local.len() <= 64
            && !domain.contains('@')
            && domain.split('.').all(|label| {
                !label.is_empty()
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            })
    }
}


/// The failure recorded for a rejected asynchronous validator.
pub(crate) fn rejection(error: &anyhow::Error) -> ValidationErrors {
    failure(ASYNC_VALIDATION_FAILED, json!({ "message": error.to_string() }))
}
