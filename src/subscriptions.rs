//! SubscriptionService: the four `/subscriptions` endpoints.
//!
//! Grounded in `original_source/datanode/src/app/scd/subscriptions.py` and
//! `subscription_endpoints.py`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthorizedClient;
use crate::config::Config;
use crate::error::{DssError, DssResult};
use crate::geo::{expand_volume4, Volume4Json};
use crate::model::{OperationJson, Subscription, SubscriptionJson};
use crate::store::ReferenceStore;

#[derive(Deserialize, Debug)]
pub struct SubscriptionPutRequest {
    #[serde(default)]
    pub old_version: u64,
    pub extents: Volume4Json,
    pub uss_base_url: String,
    #[serde(default)]
    pub notify_for_operations: bool,
    #[serde(default)]
    pub notify_for_constraints: bool,
}

#[derive(Deserialize, Debug)]
pub struct SubscriptionQueryRequest {
    pub area_of_interest: Volume4Json,
}

#[derive(Serialize, Debug)]
pub struct SubscriptionResponse {
    pub subscription: SubscriptionJson,
    pub operations: Vec<OperationJson>,
    pub constraints: Vec<serde_json::Value>,
}

#[derive(Serialize, Debug)]
pub struct SubscriptionQueryResponse {
    pub subscriptions: Vec<SubscriptionJson>,
}

#[derive(Serialize, Debug)]
pub struct DeletedSubscriptionResponse {
    pub subscription: SubscriptionJson,
}

pub fn get(store: &ReferenceStore, id: Uuid) -> DssResult<SubscriptionResponse> {
    let sub = store
        .get_sub(id)
        .ok_or_else(|| DssError::NotFound(format!("subscription {id} not found")))?;
    let operations = store.find_ops(&sub.vol4).into_iter().map(|o| o.to_json(false)).collect();
    Ok(SubscriptionResponse {
        subscription: sub.to_json(),
        operations,
        constraints: Vec::new(),
    })
}

pub fn query(
    store: &ReferenceStore,
    config: &Config,
    caller: &AuthorizedClient,
    body: SubscriptionQueryRequest,
) -> DssResult<SubscriptionQueryResponse> {
    let vol4 = expand_volume4(&body.area_of_interest, config.s2_level())?;
    let subscriptions = store
        .find_subs(&vol4, Some(&caller.client_id))
        .into_iter()
        .map(|s| s.to_json())
        .collect();
    Ok(SubscriptionQueryResponse { subscriptions })
}

/// Returns `(response, created)`; `created` tells the route handler whether
/// to answer 201 or 200.
pub fn put(
    store: &ReferenceStore,
    config: &Config,
    caller: &AuthorizedClient,
    id: Uuid,
    body: SubscriptionPutRequest,
) -> DssResult<(SubscriptionResponse, bool)> {
    let mut vol4 = expand_volume4(&body.extents, config.s2_level())?;
    if vol4.time_start.is_none() {
        vol4.time_start = Some(Utc::now());
    }

    store.transact(move |tx| {
        let existing = tx.get_sub(id);
        let created = existing.is_none();

        match &existing {
            Some(prev) => {
                if prev.owner != caller.client_id {
                    return Err(DssError::Forbidden(format!("subscription {id} is not owned by caller")));
                }
                if body.old_version != prev.version {
                    return Err(DssError::VersionConflict(format!(
                        "old_version {} does not match current version {}",
                        body.old_version, prev.version
                    )));
                }
            }
            None => {
                if body.old_version != 0 {
                    return Err(DssError::VersionConflict(
                        "old_version must be 0 when creating a subscription".into(),
                    ));
                }
            }
        }

        let (notification_index, dependent_operations, version) = match &existing {
            Some(prev) => (prev.notification_index, prev.dependent_operations.clone(), prev.version + 1),
            None => (0, Default::default(), 1),
        };

        let sub = Subscription {
            id,
            owner: caller.client_id.clone(),
            version,
            notification_index,
            vol4,
            uss_base_url: body.uss_base_url,
            notify_for_operations: body.notify_for_operations,
            notify_for_constraints: body.notify_for_constraints,
            implicit: false,
            dependent_operations,
        };

        let operations = tx.find_ops(&sub.vol4).into_iter().map(|o| o.to_json(false)).collect();
        let response = SubscriptionResponse {
            subscription: sub.to_json(),
            operations,
            constraints: Vec::new(),
        };
        tx.upsert_sub(sub);
        Ok((response, created))
    })
}

pub fn delete(store: &ReferenceStore, caller: &AuthorizedClient, id: Uuid) -> DssResult<DeletedSubscriptionResponse> {
    store.transact(|tx| {
        let sub = tx
            .get_sub(id)
            .ok_or_else(|| DssError::NotFound(format!("subscription {id} not found")))?;
        if sub.owner != caller.client_id {
            return Err(DssError::Forbidden(format!("subscription {id} is not owned by caller")));
        }
        tx.delete_sub(id);
        Ok(DeletedSubscriptionResponse { subscription: sub.to_json() })
    })
}
