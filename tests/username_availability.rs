//! Example derived from a registration form that checks with a backend
//! whether a username is still available.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use formflow::validators::required;
use formflow::{
    failure, Field, Group, NotificationPolicy, Status, ValidationErrors, ValidationFuture, Value,
    ASYNC_VALIDATION_FAILED,
};
use serde_json::json;
use tokio::time::sleep;


const TAKEN: [&str; 3] = ["admin", "user", "test"];

fn availability(value: Value) -> ValidationFuture {
    Box::pin(async move {
        sleep(Duration::from_millis(1000)).await;
        let taken = value.as_str().map_or(false, |name| TAKEN.contains(&name));
        let result: anyhow::Result<Option<ValidationErrors>> =
            Ok(taken.then(|| failure("usernameTaken", json!(true))));
        result
    })
}

fn broken_backend(_: Value) -> ValidationFuture {
    Box::pin(async {
        let result: anyhow::Result<Option<ValidationErrors>> = Err(anyhow::anyhow!("connection refused"));
        result
    })
}

fn registration() -> Group {
    Group::builder()
        .field(Field::builder("username")
            .value(json!(""))
            .validator(required())
            .async_validator(availability)
            .build())
        .field(Field::new("nickname", json!("")))
        .build()
}


#[tokio::test(start_paused = true)]
async fn pending_until_backend_answers() {
    let form = registration();
    let statuses = Arc::new(Mutex::new(vec![]));
    let _subscription = {
        let statuses = statuses.clone();
        form.subscribe_to_status(move |status| statuses.lock().unwrap().push(status)).unwrap()
    };

    form.set_value("username", json!("admin"), NotificationPolicy::Emit).unwrap();
    assert_eq!(form.status(), Status::Pending);
    sleep(Duration::from_millis(999)).await;
    assert_eq!(form.status(), Status::Pending);
    sleep(Duration::from_millis(2)).await;
    assert_eq!(form.status(), Status::Invalid);
    assert!(form.errors_at("username").unwrap().contains_key("usernameTaken"));

    form.set_value("username", json!("alice"), NotificationPolicy::Emit).unwrap();
    sleep(Duration::from_millis(1001)).await;
    assert!(form.valid());
    assert_eq!(
        *statuses.lock().unwrap(),
        vec![Status::Pending, Status::Invalid, Status::Pending, Status::Valid]
    );
}

#[tokio::test(start_paused = true)]
async fn sync_failure_skips_backend() {
    let form = registration();
    let username = form.field("username").unwrap();
    username.set_value(json!("admin"), NotificationPolicy::Emit);
    username.set_value(json!(""), NotificationPolicy::Emit);
    assert_eq!(username.status(), Status::Invalid);
    sleep(Duration::from_millis(2000)).await;
    assert!(username.has_error("required"));
    assert!(!username.has_error("usernameTaken"));
}

#[tokio::test]
async fn failing_backend_does_not_break_the_form() {
    let form = Group::builder()
        .field(Field::builder("username").async_validator(broken_backend).build())
        .field(Field::new("nickname", json!("")))
        .build();
    let nicknames = Arc::new(Mutex::new(vec![]));
    let _subscription = {
        let nicknames = nicknames.clone();
        form.field("nickname").unwrap()
            .subscribe_to_value(move |value| nicknames.lock().unwrap().push(value))
            .unwrap()
    };

    form.set_value("username", json!("alice"), NotificationPolicy::Emit).unwrap();
    for _ in 0..10 {
        if !form.field("username").unwrap().pending() { break }
        tokio::task::yield_now().await;
    }
    assert_eq!(form.status(), Status::Invalid);
    assert!(form.errors_at("username").unwrap().contains_key(ASYNC_VALIDATION_FAILED));

    form.set_value("nickname", json!("al"), NotificationPolicy::Emit).unwrap();
    assert_eq!(*nicknames.lock().unwrap(), vec![json!("al")]);
}
