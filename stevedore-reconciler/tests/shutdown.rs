//! Shutdown and fatal-error behavior of the controller loop.

mod common;

use common::{deployment, start, wait_until};
use stevedore_core::types::ManifestId;

#[tokio::test]
async fn shutdown_drains_and_exits_cleanly() {
    let h = start();
    let owner = ManifestId::deployment("web-a");

    h.store.apply(deployment("web-a", 2, "web:v1")).unwrap();
    let runtime = h.runtime.clone();
    wait_until("2 active units", move || {
        runtime.active_units(&owner).len() == 2
    })
    .await;

    h.handle.shutdown();
    let result = h.task.await.expect("controller task must not panic");
    assert!(result.is_ok(), "clean shutdown returns Ok: {:?}", result);
}

#[tokio::test]
async fn shutdown_before_any_work_is_clean() {
    let h = start();
    h.handle.shutdown();
    let result = h.task.await.expect("controller task must not panic");
    assert!(result.is_ok());
}

#[tokio::test]
async fn store_corruption_is_fatal() {
    let h = start();
    let owner = ManifestId::deployment("web-a");

    h.store.apply(deployment("web-a", 1, "web:v1")).unwrap();
    let runtime = h.runtime.clone();
    wait_until("unit created", move || {
        runtime.active_units(&owner).len() == 1
    })
    .await;

    // Store a record under a key that does not match its identity. The
    // integrity sweep at the next cycle must shut the loop down.
    h.store.insert_unchecked(
        ManifestId::deployment("ghost"),
        deployment("web-a", 1, "web:v1"),
    );

    let result = h.task.await.expect("controller task must not panic");
    let err = result.expect_err("corruption must be fatal");
    assert_eq!(err.code(), "E003");
    assert!(err.is_fatal());
}
