//! Notification seam for sharing events.
//!
//! Delivery (email, webhooks) lives outside this crate; services hold a
//! `&dyn ShareNotifier` and call it after the grant is persisted. Failures
//! to deliver never roll back the grant, so the trait is infallible.

use async_trait::async_trait;

use crate::access::AccessLevel;
use crate::db::User;
use crate::tree::Node;

/// Receiver of sharing events.
#[async_trait]
pub trait ShareNotifier: Send + Sync {
    /// Called after `user` was granted `level` on `node`.
    async fn collaborator_added(&self, node: &Node, user: &User, level: AccessLevel);
}

/// Notifier that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl ShareNotifier for NoopNotifier {
    async fn collaborator_added(&self, _node: &Node, _user: &User, _level: AccessLevel) {}
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Notifier that records events for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        events: Mutex<Vec<(String, i64, AccessLevel)>>,
    }

    impl RecordingNotifier {
        pub fn events(&self) -> Vec<(String, i64, AccessLevel)> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ShareNotifier for RecordingNotifier {
        async fn collaborator_added(&self, node: &Node, user: &User, level: AccessLevel) {
            self.events
                .lock()
                .unwrap()
                .push((node.id.clone(), user.id, level));
        }
    }
}
