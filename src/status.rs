//! Validity status and notification policy.

use std::fmt;

use serde::{Deserialize, Serialize};


/// Validity status of a field or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Valid,
    Invalid,
    /// An asynchronous validator has not resolved yet.
    Pending,
    /// Excluded from validation and from the value of its group.
    Disabled,
}

impl Status {
    pub fn is_valid(self) -> bool { self == Status::Valid }
    pub fn is_invalid(self) -> bool { self == Status::Invalid }
    pub fn is_pending(self) -> bool { self == Status::Pending }
    pub fn is_disabled(self) -> bool { self == Status::Disabled }

    /// Status of a group from the statuses of its children.
    ///
    /// Disabled children are ignored, and a group whose children are all
    /// disabled is disabled itself. Otherwise any `Invalid` child makes the
    /// group `Invalid`; failing that any `Pending` child makes it `Pending`.
    /// A group without children is `Valid`.
    pub fn aggregate<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
        let mut seen = false;
        let mut enabled = false;
        let mut pending = false;
        for status in statuses {
            seen = true;
            match status {
                Status::Invalid => return Status::Invalid,
                Status::Pending => { enabled = true; pending = true; }
                Status::Valid => enabled = true,
                Status::Disabled => {}
            }
        }
        match (seen, enabled, pending) {
            (true, false, _) => Status::Disabled,
            (_, _, true) => Status::Pending,
            _ => Status::Valid,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Valid => "VALID",
            Status::Invalid => "INVALID",
            Status::Pending => "PENDING",
            Status::Disabled => "DISABLED",
        })
    }
}


/// Whether a mutation notifies subscribers.
///
/// `Suppress` is how programmatic loads stay invisible to subscribers that
/// should only react to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NotificationPolicy {
    #[default]
    Emit,
    Suppress,
}

impl NotificationPolicy {
    pub fn emits(self) -> bool {
        self == NotificationPolicy::Emit
    }

    /// Combine the policies of changes batched into one notification.
    pub(crate) fn merge(self, other: NotificationPolicy) -> NotificationPolicy {
        if self.emits() || other.emits() {
            NotificationPolicy::Emit
        } else {
            NotificationPolicy::Suppress
        }
    }
}
