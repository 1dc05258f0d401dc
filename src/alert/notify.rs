//! System notifications: permission gate plus a unique tag per event.

use std::io::Write;

use futures::future::{self, BoxFuture};

use crate::error::AlertError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Not decided yet; asking is allowed
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Unique per event so repeated failures are not collapsed
    pub tag: String,
    pub renotify: bool,
    pub require_interaction: bool,
}

pub fn notification_tag(unix_millis: u128) -> String {
    format!("rm-fail-{unix_millis}")
}

pub trait Notifier: Send + Sync {
    fn permission(&self) -> Permission;

    /// Ask the user. May suspend on a prompt.
    fn request_permission(&self) -> BoxFuture<'_, Permission>;

    fn show(&self, notification: &Notification) -> Result<(), AlertError>;
}

/// Granted already, or granted after asking.
pub async fn ensure_permission(notifier: &dyn Notifier) -> bool {
    match notifier.permission() {
        Permission::Granted => true,
        Permission::Denied => false,
        Permission::Prompt => notifier.request_permission().await == Permission::Granted,
    }
}

/// Prints the notification on stderr. Terminals need no permission.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    fn request_permission(&self) -> BoxFuture<'_, Permission> {
        Box::pin(future::ready(Permission::Granted))
    }

    fn show(&self, notification: &Notification) -> Result<(), AlertError> {
        let mut err = std::io::stderr().lock();
        writeln!(err, "[{}] {}", notification.title, notification.body).map_err(|source| {
            AlertError::Io {
                channel: "notification",
                source,
            }
        })
    }
}
