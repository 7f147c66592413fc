//! Subscription Router (C7).
//!
//! Per-node map from backbone subjects to the local sockets fanned out to
//! them. `DashMap::entry` gives per-subject atomicity for the
//! check-then-act sequences the shared-resource policy requires (the last
//! unsubscribe and a concurrent new subscribe to the same subject can't
//! race each other into leaking or double-closing a backbone subscription).

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gateway_protocol::ServerFrame;
use tokio::sync::mpsc;

pub struct SubscriptionRouter {
    subjects: DashMap<String, DashMap<String, mpsc::Sender<ServerFrame>>>,
}

impl Default for SubscriptionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self {
            subjects: DashMap::new(),
        }
    }

    /// Registers `principal_id`'s local sender for `subject`. Returns `true`
    /// when this is the first local subscriber, meaning the caller must open
    /// the backbone subscription before acknowledging.
    pub fn add_local(
        &self,
        subject: &str,
        principal_id: &str,
        sender: mpsc::Sender<ServerFrame>,
    ) -> bool {
        match self.subjects.entry(subject.to_string()) {
            Entry::Occupied(entry) => {
                entry.get().insert(principal_id.to_string(), sender);
                false
            }
            Entry::Vacant(entry) => {
                let local = DashMap::new();
                local.insert(principal_id.to_string(), sender);
                entry.insert(local);
                true
            }
        }
    }

    /// Drops `principal_id`'s local entry for `subject`. Returns `true` when
    /// this was the last local subscriber, meaning the caller must close the
    /// backbone subscription.
    pub fn remove_local(&self, subject: &str, principal_id: &str) -> bool {
        let Entry::Occupied(mut entry) = self.subjects.entry(subject.to_string()) else {
            return false;
        };
        entry.get_mut().remove(principal_id);
        if entry.get().is_empty() {
            entry.remove();
            true
        } else {
            false
        }
    }

    /// Drops every local entry for `principal_id` across all subjects,
    /// called on disconnect. Returns the subjects whose last subscriber was
    /// this principal, so the caller can close their backbone subscriptions.
    pub fn remove_all_for_principal(&self, principal_id: &str) -> Vec<String> {
        let subjects: Vec<String> = self
            .subjects
            .iter()
            .filter(|e| e.value().contains_key(principal_id))
            .map(|e| e.key().clone())
            .collect();
        subjects
            .into_iter()
            .filter(|subject| self.remove_local(subject, principal_id))
            .collect()
    }

    pub fn fan_out(&self, subject: &str, frame: &ServerFrame) {
        if let Some(local) = self.subjects.get(subject) {
            for entry in local.iter() {
                let _ = entry.value().try_send(frame.clone());
            }
        }
    }

    pub fn has_local_subscribers(&self, subject: &str) -> bool {
        self.subjects
            .get(subject)
            .map(|m| !m.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<ServerFrame>, mpsc::Receiver<ServerFrame>) {
        mpsc::channel(8)
    }

    #[test]
    fn first_subscriber_signals_backbone_subscribe_needed() {
        let router = SubscriptionRouter::new();
        let (tx, _rx) = channel();
        assert!(router.add_local("tenant.T1.channel.chat", "A1", tx));
    }

    #[test]
    fn second_subscriber_does_not_resignal_backbone_subscribe() {
        let router = SubscriptionRouter::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        router.add_local("tenant.T1.channel.chat", "A1", tx1);
        assert!(!router.add_local("tenant.T1.channel.chat", "A2", tx2));
    }

    #[test]
    fn last_unsubscribe_signals_backbone_unsubscribe_needed() {
        let router = SubscriptionRouter::new();
        let (tx, _rx) = channel();
        router.add_local("tenant.T1.channel.chat", "A1", tx);
        assert!(router.remove_local("tenant.T1.channel.chat", "A1"));
        assert!(!router.has_local_subscribers("tenant.T1.channel.chat"));
    }

    #[tokio::test]
    async fn fan_out_delivers_to_every_local_subscriber() {
        let router = SubscriptionRouter::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        router.add_local("tenant.T1.channel.chat", "A1", tx1);
        router.add_local("tenant.T1.channel.chat", "A2", tx2);

        let frame = ServerFrame::Message {
            subject: "tenant.T1.channel.chat".into(),
            data: serde_json::json!({"m": "hi"}),
            timestamp: "2026-07-31T00:00:00Z".into(),
        };
        router.fan_out("tenant.T1.channel.chat", &frame);

        assert_eq!(rx1.recv().await.unwrap(), frame);
        assert_eq!(rx2.recv().await.unwrap(), frame);
    }

    #[test]
    fn remove_all_for_principal_closes_every_subject_it_last_held() {
        let router = SubscriptionRouter::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        router.add_local("tenant.T1.channel.a", "A1", tx1);
        router.add_local("tenant.T1.channel.b", "A1", tx2);
        let closed = router.remove_all_for_principal("A1");
        assert_eq!(closed.len(), 2);
    }
}
