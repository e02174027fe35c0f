//! Groups of fields.
//!
//! A group is an ordered tree of named controls. It listens to the change
//! stream of every child and turns all changes that happen within one
//! transaction into a single change of its own, carrying a snapshot of the
//! whole subtree. Groups flush bottom-up, so a change that crosses several
//! levels still reaches each ancestor as one event. Children are observed
//! through weak references, so a group is freed as soon as its last handle is
//! dropped.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{FormError, Result};
use crate::field::{self, Change, Field};
use crate::signal::Signal;
use crate::source::lock;
use crate::status::{NotificationPolicy, Status};
use crate::stream::{Sink, Stream};
use crate::subscription::{Subscription, Teardown};
use crate::transaction::{commit, settle};
use crate::validator::ValidationErrors;


/// A node of a group: either a field or a nested group.
#[derive(Clone, Debug)]
pub enum Control {
    Field(Field),
    Group(Group),
}

impl Control {
    pub fn as_field(&self) -> Option<&Field> {
        match self {
            Control::Field(field) => Some(field),
            Control::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Control::Group(group) => Some(group),
            Control::Field(_) => None,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Control::Field(field) => field.status(),
            Control::Group(group) => group.status(),
        }
    }

    fn changes(&self) -> Stream<Change> {
        match self {
            Control::Field(field) => field.changes(),
            Control::Group(group) => group.inner.changes.stream(),
        }
    }

    fn release(&self) {
        match self {
            Control::Field(field) => field.release(),
            Control::Group(group) => group.release(),
        }
    }
}

impl From<Field> for Control {
    fn from(field: Field) -> Control {
        Control::Field(field)
    }
}

impl From<Group> for Control {
    fn from(group: Group) -> Control {
        Control::Group(group)
    }
}


/// Child changes seen in the running transaction, not yet flushed.
#[derive(Clone, Copy)]
struct Batch {
    policy: NotificationPolicy,
    value_changed: bool,
}

struct GroupInner {
    controls: IndexMap<String, Control>,
    /// Nesting depth of the subtree; a group flushes after all lower ones.
    height: usize,
    changes: Sink<Change>,
    lifetime: Teardown,
    last_status: Mutex<Status>,
    batch: Mutex<Option<Batch>>,
    links: Mutex<Vec<Subscription>>,
}


/// An ordered tree of fields with aggregate value and status.
///
/// ```
/// # use formflow::{Field, Group, NotificationPolicy, Status};
/// # use formflow::validators::{email, required};
/// # use serde_json::json;
/// let form = Group::builder()
///     .field(Field::builder("email").validator(required()).validator(email()).build())
///     .group("address", Group::builder()
///         .field(Field::new("street", json!("")))
///         .build())
///     .build();
/// assert_eq!(form.status(), Status::Invalid);
///
/// form.set_values(&json!({ "email": "ada@example.com" }), NotificationPolicy::Emit).unwrap();
/// assert!(form.valid());
/// assert_eq!(form.field("address.street").unwrap().value(), json!(""));
/// ```
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

impl Group {
    pub fn builder() -> GroupBuilder {
        GroupBuilder { controls: IndexMap::new() }
    }

    /// Look up a control by a dotted path such as `"address.street"`.
    pub fn get(&self, path: &str) -> Result<Control> {
        let segments: Vec<&str> = path.split('.').collect();
        self.get_path(&segments)
    }

    /// Look up a control by its path segments.
    pub fn get_path(&self, segments: &[&str]) -> Result<Control> {
        let not_found = || FormError::NotFound { path: segments.join(".") };
        let (last, parents) = segments.split_last().ok_or_else(not_found)?;
        let mut group = self.clone();
        for (depth, segment) in parents.iter().enumerate() {
            group = match group.inner.controls.get(*segment) {
                Some(Control::Group(child)) => child.clone(),
                Some(Control::Field(_)) => return Err(FormError::NotAGroup {
                    path: segments[..=depth].join("."),
                }),
                None => return Err(not_found()),
            };
        }
        group.inner.controls.get(*last).cloned().ok_or_else(not_found)
    }

    /// Look up a field by a dotted path.
    pub fn field(&self, path: &str) -> Result<Field> {
        match self.get(path)? {
            Control::Field(field) => Ok(field),
            Control::Group(_) => Err(FormError::NotAField { path: path.to_string() }),
        }
    }

    /// Look up a nested group by a dotted path.
    pub fn group(&self, path: &str) -> Result<Group> {
        match self.get(path)? {
            Control::Group(group) => Ok(group),
            Control::Field(_) => Err(FormError::NotAGroup { path: path.to_string() }),
        }
    }

    /// Names of the direct children, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.controls.keys().map(String::as_str)
    }

    /// Assign the field at `path`.
    pub fn set_value(&self, path: &str, value: Value, policy: NotificationPolicy) -> Result<()> {
        self.field(path)?.set_value(value, policy);
        Ok(())
    }

    /// Assign the fields named in `partial`, recursing into nested groups.
    ///
    /// Keys absent from `partial` are left alone. The whole object is checked
    /// before anything is assigned, so an unknown key or a non-object for a
    /// nested group changes nothing. Subscribers of this group see a single
    /// event for the whole operation.
    pub fn set_values(&self, partial: &Value, policy: NotificationPolicy) -> Result<()> {
        self.check_shape(partial, &[])?;
        commit(|| self.patch(partial, policy));
        Ok(())
    }

    /// Restore every field to its entry in `defaults`, or to null, and clear
    /// interaction flags.
    pub fn reset_all(&self, defaults: Option<&Value>, policy: NotificationPolicy) -> Result<()> {
        if let Some(defaults) = defaults {
            self.check_shape(defaults, &[])?;
        }
        commit(|| self.reset_with(defaults, policy));
        Ok(())
    }

    /// Mark every field of the tree as touched, so their errors show.
    pub fn mark_all_as_touched(&self) {
        for control in self.inner.controls.values() {
            match control {
                Control::Field(field) => field.mark_as_touched(),
                Control::Group(group) => group.mark_all_as_touched(),
            }
        }
    }

    /// Snapshot of the enabled fields, nested like the tree.
    pub fn value(&self) -> Value {
        self.snapshot(false)
    }

    /// Snapshot of all fields, disabled ones included.
    pub fn raw_value(&self) -> Value {
        self.snapshot(true)
    }

    pub fn status(&self) -> Status {
        Status::aggregate(self.inner.controls.values().map(Control::status))
    }

    pub fn valid(&self) -> bool {
        self.status().is_valid()
    }

    /// Whether any field of the tree has been touched.
    pub fn touched(&self) -> bool {
        self.inner.controls.values().any(|control| match control {
            Control::Field(field) => field.touched(),
            Control::Group(group) => group.touched(),
        })
    }

    /// Whether any field of the tree is dirty.
    pub fn dirty(&self) -> bool {
        self.inner.controls.values().any(|control| match control {
            Control::Field(field) => field.dirty(),
            Control::Group(group) => group.dirty(),
        })
    }

    pub fn errors_at(&self, path: &str) -> Result<ValidationErrors> {
        Ok(self.field(path)?.errors())
    }

    /// Stream of emitted snapshots.
    pub fn value_changes(&self) -> Stream<Value> {
        field::value_events(&self.inner.changes.stream())
    }

    /// Stream of emitted aggregate status transitions.
    pub fn status_changes(&self) -> Stream<Status> {
        field::status_events(&self.inner.changes.stream())
    }

    /// The enabled-field snapshot as a signal, suppressed changes included.
    pub fn value_signal(&self) -> Signal<Value> {
        commit(|| self.inner.changes.stream().filter_map(|change| change.value).hold(self.value()))
    }

    /// The aggregate status as a signal, suppressed changes included.
    ///
    /// Sampling it is how a submit control decides whether it is enabled.
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

    /// Release the group and every control in it.
    pub fn release(&self) {
        if !self.inner.lifetime.fire() {
            return;
        }
        let links = std::mem::take(&mut *lock(&self.inner.links));
        tracing::debug!(controls = self.inner.controls.len(), "group released");
        commit(|| {
            for control in self.inner.controls.values() {
                control.release();
            }
            drop(links);
        });
    }

    pub fn is_released(&self) -> bool {
        self.inner.lifetime.is_fired()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_released() {
            Err(FormError::Released { name: "group".to_string() })
        } else {
            Ok(())
        }
    }

    fn check_shape(&self, partial: &Value, prefix: &[&str]) -> Result<()> {
        let join = |key: &str| match prefix {
            [] => key.to_string(),
            _ => format!("{}.{}", prefix.join("."), key),
        };
        let entries = partial.as_object().ok_or_else(|| FormError::ShapeMismatch {
            path: prefix.join("."),
        })?;
        for (key, value) in entries {
            match self.inner.controls.get(key) {
                None => return Err(FormError::NotFound { path: join(key) }),
                Some(Control::Field(_)) => {}
                Some(Control::Group(group)) => {
                    let mut nested = prefix.to_vec();
                    nested.push(key);
                    group.check_shape(value, &nested)?;
                }
            }
        }
        Ok(())
    }

    fn patch(&self, partial: &Value, policy: NotificationPolicy) {
        let Some(entries) = partial.as_object() else { return };
        for (key, value) in entries {
            match self.inner.controls.get(key) {
                Some(Control::Field(field)) => field.set_value(value.clone(), policy),
                Some(Control::Group(group)) => group.patch(value, policy),
                None => {}
            }
        }
    }

    fn reset_with(&self, defaults: Option<&Value>, policy: NotificationPolicy) {
        for (key, control) in &self.inner.controls {
            let default = defaults.and_then(|d| d.get(key));
            match control {
                Control::Field(field) => field.reset(default.cloned().unwrap_or(Value::Null), policy),
                Control::Group(group) => group.reset_with(default, policy),
            }
        }
    }

    fn snapshot(&self, raw: bool) -> Value {
        let mut map = Map::new();
        for (key, control) in &self.inner.controls {
            match control {
                Control::Field(field) if raw || !field.disabled() => {
                    map.insert(key.clone(), field.value());
                }
                Control::Group(group) if raw || !group.status().is_disabled() => {
                    map.insert(key.clone(), group.snapshot(raw));
                }
                _ => {}
            }
        }
        Value::Object(map)
    }

    /// Record a child change and schedule one flush per transaction.
    fn child_changed(&self, change: &Change) {
        let mut batch = lock(&self.inner.batch);
        match batch.as_mut() {
            Some(pending) => {
                pending.policy = pending.policy.merge(change.policy);
                pending.value_changed |= change.value.is_some();
            }
            None => {
                *batch = Some(Batch { policy: change.policy, value_changed: change.value.is_some() });
                let weak = Arc::downgrade(&self.inner);
                settle(self.inner.height, move || {
                    if let Some(inner) = weak.upgrade() {
                        Group { inner }.flush();
                    }
                });
            }
        }
    }

    fn flush(&self) {
        let Some(batch) = lock(&self.inner.batch).take() else { return };
        if self.is_released() {
            return;
        }
        let status = self.status();
        let status_changed = std::mem::replace(&mut *lock(&self.inner.last_status), status) != status;
        if !batch.value_changed && !status_changed {
            return;
        }
        self.inner.changes.send(Change {
            value: batch.value_changed.then(|| self.value()),
            status,
            status_changed,
            policy: batch.policy,
        });
    }
}

fn link(weak: Weak<GroupInner>, control: &Control) -> Subscription {
    control.changes().subscribe(move |change: Change| {
        if let Some(inner) = weak.upgrade() {
            Group { inner }.child_changed(&change);
        }
    })
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("controls", &self.inner.controls)
            .field("status", &self.status())
            .finish()
    }
}


/// Builder for a `Group`.
pub struct GroupBuilder {
    controls: IndexMap<String, Control>,
}

impl GroupBuilder {
    /// Add a field under its own name.
    pub fn field(mut self, field: Field) -> GroupBuilder {
        self.controls.insert(field.name().to_string(), Control::Field(field));
        self
    }

    /// Add a nested group.
    pub fn group(mut self, name: impl Into<String>, group: Group) -> GroupBuilder {
        self.controls.insert(name.into(), Control::Group(group));
        self
    }

    /// Add any control under an explicit name.
    pub fn control(mut self, name: impl Into<String>, control: impl Into<Control>) -> GroupBuilder {
        self.controls.insert(name.into(), control.into());
        self
    }

    pub fn build(self) -> Group {
        let status = Status::aggregate(self.controls.values().map(Control::status));
        let height = 1 + self.controls.values()
            .filter_map(Control::as_group)
            .map(|group| group.inner.height)
            .max()
            .unwrap_or(0);
        let group = Group {
            inner: Arc::new(GroupInner {
                controls: self.controls,
                height,
                changes: Sink::new(),
                lifetime: Teardown::new(),
                last_status: Mutex::new(status),
                batch: Mutex::new(None),
                links: Mutex::new(vec![]),
            }),
        };
        let links = group.inner.controls.values()
            .map(|control| link(Arc::downgrade(&group.inner), control))
            .collect();
        *lock(&group.inner.links) = links;
        group
    }
}
