//! OperationService: the four `/operations` endpoints, the binding
//! invariant between an Operation and its Subscription, and the
//! subscriber fan-out every mutation produces.
//!
//! Grounded in `original_source/datanode/src/app/scd/operations.py` and
//! `operation_endpoints.py`. Every multi-entity mutation below runs inside
//! one [`ReferenceStore::transact`] closure so the Operation, its bound
//! Subscription, and the post-mutation fan-out query all observe the same
//! snapshot: one critical section, no partial state ever visible.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthorizedClient;
use crate::config::Config;
use crate::error::{DssError, DssResult};
use crate::geo::{combine_volume4s, expand_volume4, Volume4, Volume4Json};
use crate::model::{Operation, OperationJson, Subscription};
use crate::notify::{plan, SubscriberGroup};
use crate::store::{ReferenceStore, StoreTxn};

#[derive(Deserialize, Debug)]
pub struct NewSubscriptionSpec {
    pub uss_base_url: String,
    #[serde(default)]
    pub notify_for_constraints: bool,
}

#[derive(Deserialize, Debug)]
pub struct OperationPutRequest {
    #[serde(default)]
    pub old_version: u64,
    pub extents: Vec<Volume4Json>,
    pub uss_base_url: String,
    pub subscription_id: Option<Uuid>,
    pub new_subscription: Option<NewSubscriptionSpec>,
}

#[derive(Deserialize, Debug)]
pub struct OperationQueryRequest {
    pub area_of_interest: Volume4Json,
}

#[derive(Serialize, Debug)]
pub struct OperationResponse {
    pub operation_reference: OperationJson,
    pub subscribers: Vec<SubscriberGroup>,
}

#[derive(Serialize, Debug)]
pub struct OperationQueryResponse {
    pub operation_references: Vec<OperationJson>,
}

fn parse_envelope(extents: &[Volume4Json], level: u8) -> DssResult<Volume4> {
    if extents.is_empty() {
        return Err(DssError::InvalidRequest("operation `extents` must contain at least one volume".into()));
    }
    let parsed: Vec<Volume4> = extents
        .iter()
        .map(|e| expand_volume4(e, level))
        .collect::<DssResult<_>>()?;
    let vol4 = combine_volume4s(&parsed);
    if vol4.time_start.is_none() || vol4.time_end.is_none() || vol4.altitude_lo.is_none() || vol4.altitude_hi.is_none() {
        return Err(DssError::InvalidRequest(
            "operation extents must be fully bounded in time and altitude".into(),
        ));
    }
    Ok(vol4)
}

/// Finds every subscription overlapping `vol4`, bumps each one's
/// `notification_index` by one, persists the bump, and groups the
/// now-current values by `uss_base_url`. Mirrors `get_subscribers` in
/// `subscriptions.py` plus the index advance spec §3/§4.5 require: a
/// subscription's `notification_index` counts how many times a nearby
/// mutation has notified it through this binding, so inclusion in a
/// fan-out must actually increment the stored counter, not just report it.
fn bump_and_plan(tx: &mut StoreTxn, vol4: &Volume4) -> Vec<SubscriberGroup> {
    let mut subs = tx.find_subs(vol4, None);
    for sub in &mut subs {
        sub.notification_index += 1;
        tx.upsert_sub(sub.clone());
    }
    plan(&subs)
}

/// Removes `op_id` from `sub_id`'s `dependent_operations`, cascading
/// deletion of the subscription if it was implicit and now has none left.
/// Mirrors DELETE step 3 in `operation_endpoints.py`, also reused when a PUT
/// rebinds an Operation away from its previous subscription.
fn unbind_from_subscription(tx: &mut StoreTxn, op_id: Uuid, sub_id: Uuid) {
    let Some(mut sub) = tx.get_sub(sub_id) else { return };
    sub.dependent_operations.remove(&op_id);
    if sub.implicit && sub.dependent_operations.is_empty() {
        tx.delete_sub(sub_id);
    } else {
        sub.version += 1;
        tx.upsert_sub(sub);
    }
}

fn resolve_binding(
    tx: &mut StoreTxn,
    caller: &AuthorizedClient,
    op_id: Uuid,
    vol4: &Volume4,
    subscription_id: Option<Uuid>,
    new_subscription: Option<NewSubscriptionSpec>,
) -> DssResult<Subscription> {
    match (subscription_id, new_subscription) {
        (Some(sub_id), _) => {
            let mut sub = tx
                .get_sub(sub_id)
                .ok_or_else(|| DssError::InvalidRequest(format!("subscription_id {sub_id} does not exist")))?;
            if !sub.vol4.contains(vol4) {
                return Err(DssError::InvalidRequest(
                    "bound subscription's extents do not contain the operation's extents".into(),
                ));
            }
            sub.dependent_operations.insert(op_id);
            sub.version += 1;
            tx.upsert_sub(sub.clone());
            Ok(sub)
        }
        (None, Some(spec)) => {
            let sub = Subscription {
                id: Uuid::new_v4(),
                owner: caller.client_id.clone(),
                version: 1,
                notification_index: 0,
                vol4: vol4.clone(),
                uss_base_url: spec.uss_base_url,
                notify_for_operations: true,
                notify_for_constraints: spec.notify_for_constraints,
                implicit: true,
                dependent_operations: [op_id].into_iter().collect(),
            };
            tx.upsert_sub(sub.clone());
            Ok(sub)
        }
        (None, None) => Err(DssError::InvalidRequest(
            "exactly one of `subscription_id` or `new_subscription` is required".into(),
        )),
    }
}

pub fn get(store: &ReferenceStore, caller: &AuthorizedClient, id: Uuid) -> DssResult<OperationJson> {
    let op = store
        .get_op(id)
        .ok_or_else(|| DssError::NotFound(format!("operation {id} not found")))?;
    Ok(op.to_json(op.owner == caller.client_id))
}

pub fn query(
    store: &ReferenceStore,
    config: &Config,
    caller: &AuthorizedClient,
    body: OperationQueryRequest,
) -> DssResult<OperationQueryResponse> {
    let vol4 = expand_volume4(&body.area_of_interest, config.s2_level())?;
    let operation_references = store
        .find_ops(&vol4)
        .into_iter()
        .map(|o| o.to_json(o.owner == caller.client_id))
        .collect();
    Ok(OperationQueryResponse { operation_references })
}

/// Returns `(response, created)`.
pub fn put(
    store: &ReferenceStore,
    config: &Config,
    caller: &AuthorizedClient,
    id: Uuid,
    body: OperationPutRequest,
) -> DssResult<(OperationResponse, bool)> {
    let vol4 = parse_envelope(&body.extents, config.s2_level())?;

    store.transact(move |tx| {
        let existing = tx.get_op(id);
        let created = existing.is_none();

        match &existing {
            Some(prev) => {
                if prev.owner != caller.client_id {
                    return Err(DssError::Forbidden(format!("operation {id} is not owned by caller")));
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
                        "old_version must be 0 when creating an operation".into(),
                    ));
                }
            }
        }

        let sub = resolve_binding(tx, caller, id, &vol4, body.subscription_id, body.new_subscription)?;

        if let Some(prev) = &existing {
            if prev.subscription != sub.id {
                unbind_from_subscription(tx, id, prev.subscription);
            }
        }

        let op = Operation {
            id,
            owner: caller.client_id.clone(),
            version: existing.as_ref().map_or(1, |p| p.version + 1),
            ovn: Operation::fresh_ovn(),
            vol4: vol4.clone(),
            uss_base_url: body.uss_base_url,
            subscription: sub.id,
        };
        tx.upsert_op(op.clone());

        let subscribers = bump_and_plan(tx, &vol4);
        Ok((
            OperationResponse {
                operation_reference: op.to_json(true),
                subscribers,
            },
            created,
        ))
    })
}

pub fn delete(store: &ReferenceStore, caller: &AuthorizedClient, id: Uuid) -> DssResult<OperationResponse> {
    store.transact(|tx| {
        let op = tx
            .get_op(id)
            .ok_or_else(|| DssError::NotFound(format!("operation {id} not found")))?;
        if op.owner != caller.client_id {
            return Err(DssError::Forbidden(format!("operation {id} is not owned by caller")));
        }
        tx.delete_op(id);
        unbind_from_subscription(tx, id, op.subscription);

        let subscribers = bump_and_plan(tx, &op.vol4);
        Ok(OperationResponse {
            operation_reference: op.to_json(true),
            subscribers,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn caller(id: &str) -> AuthorizedClient {
        AuthorizedClient { client_id: id.into(), scopes: HashSet::new() }
    }

    fn config() -> Config {
        Config {
            min_s2_level: 13,
            max_s2_level: 13,
            token_public_key_pem: None,
            token_audience: None,
            port: 8080,
        }
    }

    fn bounded_extents(lat: f64, lng: f64, radius_m: f64) -> Vec<Volume4Json> {
        vec![serde_json::from_value(serde_json::json!({
            "volume": {
                "outline_circle": {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [lng, lat]},
                    "properties": {"radius": {"units": "M", "value": radius_m}}
                },
                "altitude_lower": {"reference": "W84", "units": "M", "value": 0.0},
                "altitude_upper": {"reference": "W84", "units": "M", "value": 100.0}
            },
            "time_start": {"format": "RFC3339", "value": "2026-01-01T00:00:00Z"},
            "time_end": {"format": "RFC3339", "value": "2026-01-01T01:00:00Z"}
        }))
        .unwrap()]
    }

    #[test]
    fn unbounded_extents_are_rejected() {
        let cfg = config();
        let mut extents = bounded_extents(41.0, 29.0, 500.0);
        extents[0].time_end = None;
        let result = parse_envelope(&extents, cfg.s2_level());
        assert!(matches!(result, Err(DssError::InvalidRequest(_))));
    }

    #[test]
    fn put_with_new_subscription_creates_implicit_binding() {
        let store = ReferenceStore::new();
        let cfg = config();
        let id = Uuid::new_v4();
        let owner = caller("uss1");

        let (resp, created) = put(
            &store,
            &cfg,
            &owner,
            id,
            OperationPutRequest {
                old_version: 0,
                extents: bounded_extents(41.0, 29.0, 500.0),
                uss_base_url: "https://uss1.example/utm".into(),
                subscription_id: None,
                new_subscription: Some(NewSubscriptionSpec {
                    uss_base_url: "https://uss1.example/utm".into(),
                    notify_for_constraints: false,
                }),
            },
        )
        .unwrap();

        assert!(created);
        assert!(resp.operation_reference.ovn.is_some());
        let stored = store.get_op(id).unwrap();
        let bound_sub = store.get_sub(stored.subscription).unwrap();
        assert!(bound_sub.implicit);
        assert!(bound_sub.dependent_operations.contains(&id));
    }

    #[test]
    fn put_binding_to_non_containing_subscription_is_rejected() {
        let store = ReferenceStore::new();
        let cfg = config();
        let owner = caller("uss1");

        let sub_id = Uuid::new_v4();
        crate::subscriptions::put(
            &store,
            &cfg,
            &owner,
            sub_id,
            crate::subscriptions::SubscriptionPutRequest {
                old_version: 0,
                extents: bounded_extents(0.0, 0.0, 10.0).remove(0),
                uss_base_url: "https://uss1.example/utm".into(),
                notify_for_operations: true,
                notify_for_constraints: false,
            },
        )
        .unwrap();

        let op_id = Uuid::new_v4();
        let result = put(
            &store,
            &cfg,
            &owner,
            op_id,
            OperationPutRequest {
                old_version: 0,
                extents: bounded_extents(41.0, 29.0, 500.0),
                uss_base_url: "https://uss1.example/utm".into(),
                subscription_id: Some(sub_id),
                new_subscription: None,
            },
        );
        assert!(matches!(result, Err(DssError::InvalidRequest(_))));
        assert!(store.get_op(op_id).is_none());
    }

    #[test]
    fn delete_cascades_implicit_subscription() {
        let store = ReferenceStore::new();
        let cfg = config();
        let owner = caller("uss1");
        let op_id = Uuid::new_v4();

        let (resp, _) = put(
            &store,
            &cfg,
            &owner,
            op_id,
            OperationPutRequest {
                old_version: 0,
                extents: bounded_extents(41.0, 29.0, 500.0),
                uss_base_url: "https://uss1.example/utm".into(),
                subscription_id: None,
                new_subscription: Some(NewSubscriptionSpec {
                    uss_base_url: "https://uss1.example/utm".into(),
                    notify_for_constraints: false,
                }),
            },
        )
        .unwrap();
        let sub_id = resp.operation_reference.subscription_id;

        delete(&store, &owner, op_id).unwrap();
        assert!(store.get_op(op_id).is_none());
        assert!(store.get_sub(sub_id).is_none());
    }

    #[test]
    fn cross_owner_put_and_delete_are_forbidden() {
        let store = ReferenceStore::new();
        let cfg = config();
        let owner = caller("uss1");
        let other = caller("uss2");
        let op_id = Uuid::new_v4();

        put(
            &store,
            &cfg,
            &owner,
            op_id,
            OperationPutRequest {
                old_version: 0,
                extents: bounded_extents(41.0, 29.0, 500.0),
                uss_base_url: "https://uss1.example/utm".into(),
                subscription_id: None,
                new_subscription: Some(NewSubscriptionSpec {
                    uss_base_url: "https://uss1.example/utm".into(),
                    notify_for_constraints: false,
                }),
            },
        )
        .unwrap();

        assert!(matches!(delete(&store, &other, op_id), Err(DssError::Forbidden(_))));

        let result = put(
            &store,
            &cfg,
            &other,
            op_id,
            OperationPutRequest {
                old_version: 1,
                extents: bounded_extents(41.0, 29.0, 500.0),
                uss_base_url: "https://uss2.example/utm".into(),
                subscription_id: None,
                new_subscription: Some(NewSubscriptionSpec {
                    uss_base_url: "https://uss2.example/utm".into(),
                    notify_for_constraints: false,
                }),
            },
        );
        assert!(matches!(result, Err(DssError::Forbidden(_))));
    }

    #[test]
    fn version_conflict_leaves_store_unchanged() {
        let store = ReferenceStore::new();
        let cfg = config();
        let owner = caller("uss1");
        let op_id = Uuid::new_v4();

        put(
            &store,
            &cfg,
            &owner,
            op_id,
            OperationPutRequest {
                old_version: 0,
                extents: bounded_extents(41.0, 29.0, 500.0),
                uss_base_url: "https://uss1.example/utm".into(),
                subscription_id: None,
                new_subscription: Some(NewSubscriptionSpec {
                    uss_base_url: "https://uss1.example/utm".into(),
                    notify_for_constraints: false,
                }),
            },
        )
        .unwrap();

        let result = put(
            &store,
            &cfg,
            &owner,
            op_id,
            OperationPutRequest {
                old_version: 0,
                extents: bounded_extents(41.0, 29.0, 600.0),
                uss_base_url: "https://uss1.example/utm".into(),
                subscription_id: None,
                new_subscription: Some(NewSubscriptionSpec {
                    uss_base_url: "https://uss1.example/utm".into(),
                    notify_for_constraints: false,
                }),
            },
        );
        assert!(matches!(result, Err(DssError::VersionConflict(_))));
        assert_eq!(store.get_op(op_id).unwrap().version, 1);
    }

    #[test]
    fn fan_out_bumps_and_persists_notification_index() {
        let store = ReferenceStore::new();
        let cfg = config();
        let owner = caller("uss1");
        let other = caller("uss2");

        let sub_id = Uuid::new_v4();
        crate::subscriptions::put(
            &store,
            &cfg,
            &other,
            sub_id,
            crate::subscriptions::SubscriptionPutRequest {
                old_version: 0,
                extents: bounded_extents(41.0, 29.0, 5000.0).remove(0),
                uss_base_url: "https://uss2.example/utm".into(),
                notify_for_operations: true,
                notify_for_constraints: false,
            },
        )
        .unwrap();
        assert_eq!(store.get_sub(sub_id).unwrap().notification_index, 0);

        let op_id = Uuid::new_v4();
        let (resp, _) = put(
            &store,
            &cfg,
            &owner,
            op_id,
            OperationPutRequest {
                old_version: 0,
                extents: bounded_extents(41.0, 29.0, 500.0),
                uss_base_url: "https://uss1.example/utm".into(),
                subscription_id: None,
                new_subscription: Some(NewSubscriptionSpec {
                    uss_base_url: "https://uss1.example/utm".into(),
                    notify_for_constraints: false,
                }),
            },
        )
        .unwrap();

        let group = resp.subscribers.iter().find(|g| g.uss_base_url == "https://uss2.example/utm").unwrap();
        assert_eq!(group.subscriptions[0].notification_index, 1);
        assert_eq!(store.get_sub(sub_id).unwrap().notification_index, 1);

        delete(&store, &owner, op_id).unwrap();
        assert_eq!(store.get_sub(sub_id).unwrap().notification_index, 2);
    }
}
