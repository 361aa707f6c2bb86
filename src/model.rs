//! Subscription and Operation domain types, and their wire representations.
//!
//! Grounded in `original_source/datanode/src/app/scd/subscriptions.py` and
//! `operations.py`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::geo::Volume4;

#[derive(Clone, Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub owner: String,
    pub version: u64,
    pub notification_index: u64,
    pub vol4: Volume4,
    pub uss_base_url: String,
    pub notify_for_operations: bool,
    pub notify_for_constraints: bool,
    pub implicit: bool,
    pub dependent_operations: HashSet<Uuid>,
}

impl Subscription {
    pub fn to_json(&self) -> SubscriptionJson {
        SubscriptionJson {
            id: self.id,
            version: self.version,
            notification_index: self.notification_index,
            time_start: format_ts(self.vol4.time_start),
            time_end: format_ts_opt(self.vol4.time_end),
            uss_base_url: self.uss_base_url.clone(),
            notify_for_operations: self.notify_for_operations,
            notify_for_constraints: self.notify_for_constraints,
            implicit_subscription: self.implicit,
            dependent_operations: self.dependent_operations.iter().copied().collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Operation {
    pub id: Uuid,
    pub owner: String,
    pub version: u64,
    pub ovn: String,
    pub vol4: Volume4,
    pub uss_base_url: String,
    pub subscription: Uuid,
}

impl Operation {
    pub fn to_json(&self, include_ovn: bool) -> OperationJson {
        OperationJson {
            id: self.id,
            owner: self.owner.clone(),
            version: self.version,
            time_start: format_ts_opt(self.vol4.time_start),
            time_end: format_ts_opt(self.vol4.time_end),
            uss_base_url: self.uss_base_url.clone(),
            subscription_id: self.subscription,
            ovn: if include_ovn { Some(self.ovn.clone()) } else { None },
        }
    }

    pub fn fresh_ovn() -> String {
        Uuid::new_v4().to_string()
    }
}

#[derive(Serialize, Debug)]
pub struct SubscriptionJson {
    pub id: Uuid,
    pub version: u64,
    pub notification_index: u64,
    pub time_start: String,
    pub time_end: String,
    pub uss_base_url: String,
    pub notify_for_operations: bool,
    pub notify_for_constraints: bool,
    pub implicit_subscription: bool,
    pub dependent_operations: Vec<Uuid>,
}

#[derive(Serialize, Debug)]
pub struct OperationJson {
    pub id: Uuid,
    pub owner: String,
    pub version: u64,
    pub time_start: String,
    pub time_end: String,
    pub uss_base_url: String,
    pub subscription_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ovn: Option<String>,
}

/// Formats a timestamp the way `format_utils.format_ts` does in the
/// original: millisecond precision with a literal `Z` suffix, not the
/// default RFC3339 rendering.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    format!("{}Z", ts.format("%Y-%m-%dT%H:%M:%S%.3f"))
}

/// Mirrors `format_utils.format_ts`'s default-argument behavior: called
/// with no timestamp, the original formats the current instant rather than
/// an empty string. A subscription with no `time_end` therefore reports
/// "now" at read time rather than a blank field, and an Operation never
/// takes this branch since its envelope is required to be fully bounded.
pub fn format_ts_opt(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => format_ts(ts),
        None => format_ts(Utc::now()),
    }
}
