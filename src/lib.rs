//! Change-notifying form fields and groups
//!
//! *Formflow* models the state of an input form as a tree of fields. Every
//! field holds an untyped value, a validity status and the failure reasons
//! reported by its validators. Groups nest fields and other groups, and
//! derive an aggregate value and status from their children.
//!
//! All notifications travel on reactive streams. A `Sink` is the only way to
//! create events from scratch; a `Stream` is a discrete sequence of events
//! that can be mapped, filtered, merged and throttled; a `Signal` holds the
//! last value of a stream. Events are delivered in transactions, so a callback
//! that mutates a field simply queues that change behind the delivery that is
//! currently running.
//!
//!
//! # Notification policy
//!
//! Every mutation takes a `NotificationPolicy`. With `Emit` subscribers are
//! told about the new value and any status transition. With `Suppress` the
//! value and status are updated silently, which is how data loaded from a
//! backend stays invisible to subscribers that only care about user input.
//!
//!
//! # Example
//!
//! ```
//! # // NOTE: If you change this example, please update the README.md
//! # // accordingly, so that they remain in sync!
//! use std::sync::{Arc, Mutex};
//! use formflow::{Field, Group, NotificationPolicy, Status};
//! use formflow::validators::{email, required};
//! use serde_json::json;
//!
//! let form = Group::builder()
//!     .field(Field::builder("email").validator(required()).validator(email()).build())
//!     .group("address", Group::builder()
//!         .field(Field::new("street", json!("")))
//!         .build())
//!     .build();
//! assert_eq!(form.status(), Status::Invalid);
//!
//! // Watch the whole form
//! let seen = Arc::new(Mutex::new(vec![]));
//! let _subscription = {
//!     let seen = seen.clone();
//!     form.subscribe_to_value(move |snapshot| seen.lock().unwrap().push(snapshot)).unwrap()
//! };
//!
//! // Loading data notifies nobody
//! form.set_values(&json!({ "address": { "street": "Main St" } }), NotificationPolicy::Suppress).unwrap();
//! assert!(seen.lock().unwrap().is_empty());
//!
//! // User input does
//! form.field("email").unwrap().input(json!("ada@example.com"));
//! assert!(form.valid());
//! assert_eq!(seen.lock().unwrap()[0]["address"]["street"], json!("Main St"));
//! ```
//!
//! Debouncing needs a tokio runtime for its timers, and so do asynchronous
//! validators. Everything else works without one.
//!
//! Note that all these objects are `Send + Sync + Clone`. Clones of a field or
//! group refer to the same underlying control.

pub use crate::config::PipelineConfig;
pub use crate::error::{FormError, Result};
pub use crate::field::{Field, FieldBuilder};
pub use crate::group::{Control, Group, GroupBuilder};
pub use crate::signal::Signal;
pub use crate::status::{NotificationPolicy, Status};
pub use crate::stream::{Events, Sink, Stream};
pub use crate::subscription::{Scope, Subscription, Teardown};
pub use crate::validator::{
    failure, validators, AsyncValidator, ValidationErrors, ValidationFuture, Validator,
    ASYNC_VALIDATION_FAILED,
};
pub use serde_json::Value;

mod config;
mod error;
mod field;
mod group;
mod pending;
mod signal;
mod source;
mod status;
mod stream;
mod subscription;
mod transaction;
mod validator;

#[cfg(test)]
mod testing;
