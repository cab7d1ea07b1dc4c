//! Service endpoint lifecycle: registration tracks the set of serving units.

mod common;

use common::{deployment, service, start, wait_until};
use stevedore_core::types::ManifestId;

#[tokio::test]
async fn endpoint_registers_once_units_are_ready() {
    let h = start();

    h.store.apply(deployment("web-a", 2, "web:v1")).unwrap();
    h.store.apply(service("web-svc", "web-a", 8080)).unwrap();

    let network = h.network.clone();
    wait_until("endpoint registered", move || {
        network.address_of("web-svc").is_some()
    })
    .await;

    let cache = h.cache.clone();
    wait_until("both members tracked", move || {
        cache
            .endpoint("web-svc")
            .is_some_and(|ep| ep.members.len() == 2)
    })
    .await;

    let endpoint = h.cache.endpoint("web-svc").unwrap();
    assert_eq!(endpoint.port, 8080);
    assert_eq!(endpoint.address, h.network.address_of("web-svc").unwrap());
}

#[tokio::test]
async fn endpoint_membership_follows_scaling() {
    let h = start();

    h.store.apply(deployment("web-a", 1, "web:v1")).unwrap();
    h.store.apply(service("web-svc", "web-a", 8080)).unwrap();

    let cache = h.cache.clone();
    wait_until("one member", move || {
        cache
            .endpoint("web-svc")
            .is_some_and(|ep| ep.members.len() == 1)
    })
    .await;
    let address = h.network.address_of("web-svc").unwrap();

    h.store.apply(deployment("web-a", 3, "web:v1")).unwrap();

    let cache = h.cache.clone();
    wait_until("membership refreshed to 3", move || {
        cache
            .endpoint("web-svc")
            .is_some_and(|ep| ep.members.len() == 3)
    })
    .await;

    assert_eq!(
        h.network.address_of("web-svc").unwrap(),
        address,
        "the virtual address is stable across re-registration"
    );
}

#[tokio::test]
async fn endpoint_deregisters_when_backends_disappear() {
    let h = start();

    h.store.apply(deployment("web-a", 1, "web:v1")).unwrap();
    h.store.apply(service("web-svc", "web-a", 8080)).unwrap();

    let network = h.network.clone();
    wait_until("endpoint registered", move || {
        network.address_of("web-svc").is_some()
    })
    .await;

    // Removing the deployment orphans its units; once they are gone the
    // service has no serving members left.
    h.store.remove(&ManifestId::deployment("web-a"));

    let network = h.network.clone();
    wait_until("endpoint deregistered", move || {
        network.address_of("web-svc").is_none()
    })
    .await;
    assert!(h.cache.endpoint("web-svc").is_none());
}

#[tokio::test]
async fn removed_service_releases_its_endpoint() {
    let h = start();

    h.store.apply(deployment("web-a", 1, "web:v1")).unwrap();
    h.store.apply(service("web-svc", "web-a", 8080)).unwrap();

    let network = h.network.clone();
    wait_until("endpoint registered", move || {
        network.address_of("web-svc").is_some()
    })
    .await;

    h.store.remove(&ManifestId::service("web-svc"));

    let network = h.network.clone();
    wait_until("orphaned endpoint released", move || {
        network.address_of("web-svc").is_none()
    })
    .await;

    // The deployment itself is untouched.
    assert_eq!(
        h.runtime
            .active_units(&ManifestId::deployment("web-a"))
            .len(),
        1
    );
}

#[tokio::test]
async fn selector_can_back_only_one_endpoint() {
    let h = start();

    h.store.apply(deployment("web-a", 1, "web:v1")).unwrap();
    h.store.apply(service("web-svc-a", "web-a", 8080)).unwrap();
    h.store.apply(service("web-svc-b", "web-a", 8080)).unwrap();

    let network = h.network.clone();
    wait_until("one endpoint wins", move || network.endpoint_count() == 1).await;

    let status = h.handle.status();
    wait_until("the loser reports the conflict", move || {
        [
            ManifestId::service("web-svc-a"),
            ManifestId::service("web-svc-b"),
        ]
        .iter()
        .any(|id| {
            status.get(id).is_some_and(|s| {
                s.last_error
                    .as_deref()
                    .is_some_and(|e| e.contains("conflict"))
            })
        })
    })
    .await;

    assert_eq!(h.network.endpoint_count(), 1);
}
