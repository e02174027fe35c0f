//! Change-notifying form fields.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{FormError, Result};
use crate::source::{read, write};
use crate::signal::Signal;
use crate::status::{NotificationPolicy, Status};
use crate::stream::{Sink, Stream};
use crate::subscription::{Subscription, Teardown};
use crate::transaction::commit;
use crate::validator::{self, AsyncValidator, ValidationErrors, Validator};


/// A change of a field or group, as seen by its parent.
///
/// Suppressed changes travel the same way as emitted ones, so parents keep
/// their aggregate state current; only the public streams drop them.
#[derive(Clone, Debug)]
pub(crate) struct Change {
    /// The new value, or `None` when only the status moved.
    pub value: Option<Value>,
    pub status: Status,
    pub status_changed: bool,
    pub policy: NotificationPolicy,
}

pub(crate) fn value_events(changes: &Stream<Change>) -> Stream<Value> {
    changes.filter_map(|change| if change.policy.emits() { change.value } else { None })
}

pub(crate) fn status_events(changes: &Stream<Change>) -> Stream<Status> {
    changes.filter_map(|change| {
        (change.policy.emits() && change.status_changed).then(|| change.status)
    })
}


struct FieldState {
    value: Value,
    status: Status,
    errors: ValidationErrors,
    touched: bool,
    dirty: bool,
    disabled: bool,
    /// Bumped by every validation run; stale async results are dropped.
    generation: u64,
    validation: Option<JoinHandle<()>>,
}

struct FieldInner {
    name: String,
    state: RwLock<FieldState>,
    validators: Vec<Arc<dyn Validator>>,
    async_validators: Vec<Arc<dyn AsyncValidator>>,
    changes: Sink<Change>,
    lifetime: Teardown,
}

impl Drop for FieldInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(task) = state.validation.take() {
            task.abort();
        }
    }
}


/// A named value with a validity status and change notifications.
///
/// Clones refer to the same field.
///
/// ```
/// # use formflow::{Field, NotificationPolicy, Status};
/// # use formflow::validators::required;
/// # use serde_json::json;
/// let name = Field::builder("name").validator(required()).build();
/// assert_eq!(name.status(), Status::Invalid);
///
/// name.set_value(json!("Ada"), NotificationPolicy::Suppress);
/// assert_eq!(name.status(), Status::Valid);
/// ```
#[derive(Clone)]
pub struct Field {
    inner: Arc<FieldInner>,
}

impl Field {
    /// A field without validators.
    pub fn new(name: impl Into<String>, value: Value) -> Field {
        Field::builder(name).value(value).build()
    }

    pub fn builder(name: impl Into<String>) -> FieldBuilder {
        FieldBuilder {
            name: name.into(),
            value: Value::Null,
            disabled: false,
            validators: vec![],
            async_validators: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn value(&self) -> Value {
        read(&self.inner.state).value.clone()
    }

    pub fn status(&self) -> Status {
        read(&self.inner.state).status
    }

    pub fn errors(&self) -> ValidationErrors {
        read(&self.inner.state).errors.clone()
    }

    pub fn has_error(&self, reason: &str) -> bool {
        read(&self.inner.state).errors.contains_key(reason)
    }

    pub fn valid(&self) -> bool { self.status().is_valid() }
    pub fn invalid(&self) -> bool { self.status().is_invalid() }
    pub fn pending(&self) -> bool { self.status().is_pending() }
    pub fn disabled(&self) -> bool { self.status().is_disabled() }

    pub fn touched(&self) -> bool {
        read(&self.inner.state).touched
    }

    /// Whether the user has changed the value since the last reset.
    pub fn dirty(&self) -> bool {
        read(&self.inner.state).dirty
    }

    /// Assign a value programmatically.
    ///
    /// With `Emit`, value subscribers receive the value and status subscribers
    /// receive the new status if it changed. With `Suppress`, value and status
    /// are updated without notifying anyone.
    pub fn set_value(&self, value: Value, policy: NotificationPolicy) {
        self.apply(policy, move |state| state.value = value);
    }

    /// A value typed by the user: marks the field dirty and notifies.
    pub fn input(&self, value: Value) {
        self.apply(NotificationPolicy::Emit, move |state| {
            state.value = value;
            state.dirty = true;
        });
    }

    /// Re-run validation against the current value.
    pub fn update_value_and_validity(&self, policy: NotificationPolicy) {
        self.apply(policy, |_| ());
    }

    /// Restore a value and clear the interaction flags.
    pub fn reset(&self, value: Value, policy: NotificationPolicy) {
        self.apply(policy, move |state| {
            state.value = value;
            state.touched = false;
            state.dirty = false;
        });
    }

    /// Exclude the field from validation and from its group's value.
    pub fn disable(&self, policy: NotificationPolicy) {
        self.apply(policy, |state| state.disabled = true);
    }

    pub fn enable(&self, policy: NotificationPolicy) {
        self.apply(policy, |state| state.disabled = false);
    }

    pub fn mark_as_touched(&self) {
        write(&self.inner.state).touched = true;
    }

    pub fn mark_as_untouched(&self) {
        write(&self.inner.state).touched = false;
    }

    pub fn mark_as_dirty(&self) {
        write(&self.inner.state).dirty = true;
    }

    pub fn mark_as_pristine(&self) {
        write(&self.inner.state).dirty = false;
    }

    /// Stream of emitted values.
    pub fn value_changes(&self) -> Stream<Value> {
        value_events(&self.inner.changes.stream())
    }

    /// Stream of emitted status transitions.
    pub fn status_changes(&self) -> Stream<Status> {
        status_events(&self.inner.changes.stream())
    }

    /// The current value as a signal.
    ///
    /// Unlike `value_changes` the signal follows suppressed changes too, so
    /// it always samples what `value` returns once a change has settled.
    pub fn value_signal(&self) -> Signal<Value> {
        commit(|| self.inner.changes.stream().filter_map(|change| change.value).hold(self.value()))
    }

    /// The current status as a signal, suppressed changes included.
    pub fn status_signal(&self) -> Signal<Status> {
        commit(|| self.inner.changes.stream().map(|change| change.status).hold(self.status()))
    }

    pub fn subscribe_to_value<F>(&self, callback: F) -> Result<Subscription>
        where F: FnMut(Value) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.value_changes().subscribe_until(&self.inner.lifetime, callback))
    }

    pub fn subscribe_to_status<F>(&self, callback: F) -> Result<Subscription>
        where F: FnMut(Status) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.status_changes().subscribe_until(&self.inner.lifetime, callback))
    }

    /// Release the field: its subscriptions go quiet, pending validation is
    /// abandoned and later mutations notify nobody.
    pub fn release(&self) {
        if self.inner.lifetime.fire() {
            tracing::debug!(field = %self.inner.name, "field released");
            if let Some(task) = write(&self.inner.state).validation.take() {
                task.abort();
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.lifetime.is_fired()
    }

    pub(crate) fn changes(&self) -> Stream<Change> {
        self.inner.changes.stream()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_released() {
            Err(FormError::Released { name: self.inner.name.clone() })
        } else {
            Ok(())
        }
    }

    fn apply<F: FnOnce(&mut FieldState)>(&self, policy: NotificationPolicy, mutate: F) {
        commit(|| {
            let change = {
                let mut state = write(&self.inner.state);
                mutate(&mut state);
                let before = state.status;
                self.validate(&mut state, policy);
                Change {
                    value: Some(state.value.clone()),
                    status: state.status,
                    status_changed: state.status != before,
                    policy,
                }
            };
            if !self.is_released() {
                self.inner.changes.send(change);
            }
        })
    }

    fn validate(&self, state: &mut FieldState, policy: NotificationPolicy) {
        state.generation += 1;
        if let Some(task) = state.validation.take() {
            task.abort();
        }
        if state.disabled {
            state.errors.clear();
            state.status = Status::Disabled;
            return;
        }
        let errors = validator::run_sync(&self.inner.validators, &state.value);
        if !errors.is_empty() || self.inner.async_validators.is_empty() || self.is_released() {
            state.status = if errors.is_empty() { Status::Valid } else { Status::Invalid };
            state.errors = errors;
            return;
        }
        state.errors.clear();
        match Handle::try_current() {
            Ok(handle) => {
                state.status = Status::Pending;
                state.validation = Some(handle.spawn(validate_async(
                    Arc::downgrade(&self.inner),
                    self.inner.async_validators.clone(),
                    state.value.clone(),
                    state.generation,
                    policy,
                )));
            }
            Err(_) => {
                let error = anyhow::anyhow!("no tokio runtime to run asynchronous validators");
                tracing::error!(field = %self.inner.name, %error, "asynchronous validation rejected");
                state.errors = validator::rejection(&error);
                state.status = Status::Invalid;
            }
        }
    }

    fn complete_validation(
        &self,
        generation: u64,
        outcome: anyhow::Result<ValidationErrors>,
        policy: NotificationPolicy,
    ) {
        commit(|| {
            let change = {
                let mut state = write(&self.inner.state);
                if state.generation != generation || self.is_released() {
                    return;
                }
                state.validation = None;
                let errors = match outcome {
                    Ok(errors) => errors,
                    Err(error) => {
                        tracing::error!(field = %self.inner.name, %error, "asynchronous validation rejected");
                        validator::rejection(&error)
                    }
                };
                let before = state.status;
                state.status = if errors.is_empty() { Status::Valid } else { Status::Invalid };
                state.errors = errors;
                Change {
                    value: None,
                    status: state.status,
                    status_changed: state.status != before,
                    policy,
                }
            };
            self.inner.changes.send(change);
        })
    }
}

async fn validate_async(
    field: Weak<FieldInner>,
    validators: Vec<Arc<dyn AsyncValidator>>,
    value: Value,
    generation: u64,
    policy: NotificationPolicy,
) {
    let outcome = validator::run_async(validators, value).await;
    if let Some(inner) = field.upgrade() {
        Field { inner }.complete_validation(generation, outcome, policy);
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = read(&self.inner.state);
        f.debug_struct("Field")
            .field("name", &self.inner.name)
            .field("value", &state.value)
            .field("status", &state.status)
            .field("errors", &state.errors)
            .finish()
    }
}


/// Builder for a `Field`.
pub struct FieldBuilder {
    name: String,
    value: Value,
    disabled: bool,
    validators: Vec<Arc<dyn Validator>>,
    async_validators: Vec<Arc<dyn AsyncValidator>>,
}

impl FieldBuilder {
    pub fn value(mut self, value: Value) -> FieldBuilder {
        self.value = value;
        self
    }

    pub fn validator<V: Validator + 'static>(mut self, validator: V) -> FieldBuilder {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Add an asynchronous validator. It runs only when every synchronous
    /// validator passes, and needs a tokio runtime.
    pub fn async_validator<V: AsyncValidator + 'static>(mut self, validator: V) -> FieldBuilder {
        self.async_validators.push(Arc::new(validator));
        self
    }

    pub fn disabled(mut self, disabled: bool) -> FieldBuilder {
        self.disabled = disabled;
        self
    }

    /// Create the field and validate its initial value.
    pub fn build(self) -> Field {
        let field = Field {
            inner: Arc::new(FieldInner {
                name: self.name,
                state: RwLock::new(FieldState {
                    value: self.value,
                    status: Status::Valid,
                    errors: ValidationErrors::new(),
                    touched: false,
                    dirty: false,
                    disabled: self.disabled,
                    generation: 0,
                    validation: None,
                }),
                validators: self.validators,
                async_validators: self.async_validators,
                changes: Sink::new(),
                lifetime: Teardown::new(),
            }),
        };
        {
            let mut state = write(&field.inner.state);
            field.validate(&mut state, NotificationPolicy::Suppress);
        }
        field
    }
}
