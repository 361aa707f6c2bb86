//! NotificationPlanner: groups subscribers that must be notified of a
//! mutation by the USS base URL they registered, in the order their
//! subscriptions were encountered.
//!
//! Grounded in `get_subscribers`/`get_notifications` in
//! `original_source/datanode/src/app/scd/subscriptions.py`. The planner is
//! pure: it does no I/O and holds no lock, so it can run after a store
//! transaction has already released its guard.

use serde::Serialize;
use uuid::Uuid;

use crate::model::Subscription;

#[derive(Serialize, Debug, PartialEq)]
pub struct SubscriberNotification {
    pub subscription_id: Uuid,
    pub notification_index: u64,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct SubscriberGroup {
    pub uss_base_url: String,
    pub subscriptions: Vec<SubscriberNotification>,
}

/// Groups `subs` by `uss_base_url`, preserving the order each URL was first
/// seen and the order subscriptions were appended within it.
pub fn plan(subs: &[Subscription]) -> Vec<SubscriberGroup> {
    let mut groups: Vec<SubscriberGroup> = Vec::new();

    for sub in subs {
        let notification = SubscriberNotification {
            subscription_id: sub.id,
            notification_index: sub.notification_index,
        };
        match groups.iter_mut().find(|g| g.uss_base_url == sub.uss_base_url) {
            Some(group) => group.subscriptions.push(notification),
            None => groups.push(SubscriberGroup {
                uss_base_url: sub.uss_base_url.clone(),
                subscriptions: vec![notification],
            }),
        }
    }

    groups
}
