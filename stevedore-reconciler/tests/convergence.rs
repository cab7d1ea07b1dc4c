//! Replica convergence: the observed active count reaches the desired count
//! within a bounded number of cycles against a non-failing runtime.

mod common;

use common::{deployment, start, wait_until};
use stevedore_core::types::ManifestId;

#[tokio::test]
async fn scales_up_from_zero_to_desired() {
    let h = start();
    let owner = ManifestId::deployment("web-a");

    h.store.apply(deployment("web-a", 3, "web:v1")).unwrap();

    let runtime = h.runtime.clone();
    wait_until("3 active units", move || {
        runtime.active_units(&owner).len() == 3
    })
    .await;

    let status_owner = ManifestId::deployment("web-a");
    let status = h.handle.status();
    wait_until("converged status", move || {
        status
            .get(&status_owner)
            .is_some_and(|s| s.converged && s.active == 3 && s.ready == 3)
    })
    .await;
}

#[tokio::test]
async fn scales_down_terminating_oldest_first() {
    let h = start();
    let owner = ManifestId::deployment("web-a");

    h.store.apply(deployment("web-a", 3, "web:v1")).unwrap();
    let runtime = h.runtime.clone();
    wait_until("3 active units", move || {
        runtime.active_units(&owner).len() == 3
    })
    .await;

    let created = h.runtime.created_order();
    assert_eq!(created.len(), 3);
    let newest = created[2];

    h.store.apply(deployment("web-a", 1, "web:v1")).unwrap();

    let owner = ManifestId::deployment("web-a");
    let runtime = h.runtime.clone();
    wait_until("scale down to 1", move || {
        runtime.active_units(&owner).len() == 1
    })
    .await;

    let survivors = h.runtime.active_units(&ManifestId::deployment("web-a"));
    assert_eq!(
        survivors,
        vec![newest],
        "the most recently observed unit survives a scale-down"
    );
}

#[tokio::test]
async fn failed_units_are_reaped_and_replaced() {
    let h = start();
    let owner = ManifestId::deployment("web-a");

    h.store.apply(deployment("web-a", 2, "web:v1")).unwrap();
    let runtime = h.runtime.clone();
    wait_until("2 active units", move || {
        runtime.active_units(&owner).len() == 2
    })
    .await;

    let victim = h.runtime.created_order()[0];
    h.runtime.fail_unit(victim);

    let owner = ManifestId::deployment("web-a");
    let runtime = h.runtime.clone();
    wait_until("replacement created", move || {
        let active = runtime.active_units(&owner);
        active.len() == 2 && !active.contains(&victim)
    })
    .await;

    // The failed husk was terminated, not just ignored.
    assert!(h.runtime.terminate_calls() >= 1);
}

#[tokio::test]
async fn orphaned_units_are_garbage_collected() {
    let h = start();
    let owner = ManifestId::deployment("web-a");

    h.store.apply(deployment("web-a", 2, "web:v1")).unwrap();
    let runtime = h.runtime.clone();
    wait_until("2 active units", move || {
        runtime.active_units(&owner).len() == 2
    })
    .await;

    h.store.remove(&ManifestId::deployment("web-a"));

    let owner = ManifestId::deployment("web-a");
    let runtime = h.runtime.clone();
    wait_until("orphans terminated", move || {
        runtime.active_units(&owner).is_empty()
    })
    .await;
}

#[tokio::test]
async fn identical_apply_causes_no_churn() {
    let h = start();
    let owner = ManifestId::deployment("web-a");

    h.store.apply(deployment("web-a", 2, "web:v1")).unwrap();
    let runtime = h.runtime.clone();
    wait_until("2 active units", move || {
        runtime.active_units(&owner).len() == 2
    })
    .await;

    let creates = h.runtime.create_calls();
    h.store.apply(deployment("web-a", 2, "web:v1")).unwrap();
    h.handle.trigger_reconcile();

    let status = h.handle.status();
    let owner = ManifestId::deployment("web-a");
    wait_until("still converged", move || {
        status.get(&owner).is_some_and(|s| s.converged)
    })
    .await;

    assert_eq!(
        h.runtime.create_calls(),
        creates,
        "re-applying an identical manifest must not create units"
    );
    assert_eq!(h.runtime.terminate_calls(), 0);
}
