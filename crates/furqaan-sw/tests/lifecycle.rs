//! Install / activate lifecycle and cache versioning.

mod common;

use common::*;
use furqaan_sw::{
    CacheEntry, CacheStorage, ContainerEvent, ResponseSource, ServiceWorkerContainer,
    ServiceWorkerError, WorkerGlobalScope, WorkerState,
};

#[tokio::test]
async fn test_install_populates_static_bucket() {
    let fetcher = site();
    let (container, controller) = active(&fetcher, config("v1", &["/", "/style.css", "/404.html"])).await;

    assert_eq!(controller.state().await, WorkerState::Activated);
    assert_eq!(container.active_version().await.as_deref(), Some("v1"));

    let caches = container.scope().caches.read().await;
    let bucket = caches.get("static-v1").unwrap();
    assert_eq!(bucket.len(), 3);
    assert!(bucket.match_request(&get("/style.css").cache_key()).is_some());
}

#[tokio::test]
async fn test_install_fails_atomically_on_error_status() {
    let fetcher = site();
    fetcher.serve("/style.css", 500, b"boom");
    let (container, mut events) = container(&fetcher);

    let err = container
        .register(config("v1", &["/", "/style.css"]))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceWorkerError::InstallFailed { .. }));
    assert!(!container.scope().caches.read().await.has("static-v1"));
    assert!(container.active().await.is_none());
    assert!(container.waiting().await.is_none());

    assert_eq!(
        events.recv().await,
        Some(ContainerEvent::UpdateFound {
            version: "v1".into()
        })
    );
    assert_eq!(
        events.recv().await,
        Some(ContainerEvent::StateChange {
            version: "v1".into(),
            state: WorkerState::Redundant,
        })
    );
}

#[tokio::test]
async fn test_install_fails_when_offline() {
    let fetcher = site();
    fetcher.set_offline(true);
    let (container, _events) = container(&fetcher);

    let err = container.register(config("v1", &["/"])).await.unwrap_err();
    assert!(matches!(err, ServiceWorkerError::InstallFailed { .. }));
    assert!(container.scope().caches.read().await.keys().is_empty());
}

#[tokio::test]
async fn test_failed_upgrade_keeps_previous_version_serving() {
    let fetcher = site();
    let (container, v1) = active(&fetcher, config("v1", &["/style.css", "/404.html"])).await;

    fetcher.serve("/app.js", 404, b"");
    let err = container
        .register(config("v2", &["/style.css", "/app.js", "/404.html"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceWorkerError::InstallFailed { .. }));

    assert_eq!(container.active_version().await.as_deref(), Some("v1"));
    assert_eq!(v1.state().await, WorkerState::Activated);
    assert!(!container.scope().caches.read().await.has("static-v2"));
    assert!(container.scope().caches.read().await.has("static-v1"));

    fetcher.set_offline(true);
    let served = container
        .handle_fetch(&get("/style.css"))
        .await
        .unwrap()
        .response()
        .cloned()
        .unwrap();
    assert_eq!(
        served.source,
        ResponseSource::Cache {
            bucket: "static-v1".into()
        }
    );
}

#[tokio::test]
async fn test_activation_purges_other_versions() {
    let fetcher = site();
    let (container, v1) = active(&fetcher, config("v1", &["/style.css", "/404.html"])).await;

    respond(&v1, &get("/logo.png")).await;
    v1.settle().await;
    container
        .scope()
        .caches
        .write()
        .await
        .open("furqaan-v1.1.0")
        .await
        .unwrap();
    assert!(container.scope().caches.read().await.has("dynamic-v1"));

    container
        .register(config("v2", &["/style.css", "/404.html"]))
        .await
        .unwrap();

    let names = container.scope().caches.read().await.keys();
    assert_eq!(names, vec!["static-v2"]);
    assert_eq!(container.active_version().await.as_deref(), Some("v2"));
    assert_eq!(v1.state().await, WorkerState::Redundant);
}

#[tokio::test]
async fn test_in_flight_request_of_retired_version_does_not_recreate_its_bucket() {
    let fetcher = site();
    fetcher.serve("/slow.png", 200, b"slow");
    let gate = fetcher.hold("/slow.png");
    let (container, v1) = active(&fetcher, config("v1", &["/style.css", "/404.html"])).await;

    let in_flight = {
        let v1 = v1.clone();
        tokio::spawn(async move { respond(&v1, &get("/slow.png")).await })
    };
    while fetcher.calls_to("/slow.png") == 0 {
        tokio::task::yield_now().await;
    }

    container
        .register(config("v2", &["/style.css", "/404.html"]))
        .await
        .unwrap();
    assert_eq!(container.scope().caches.read().await.keys(), vec!["static-v2"]);

    gate.notify_one();
    let served = in_flight.await.unwrap();
    assert_eq!(&served.response.body[..], b"slow");
    v1.settle().await;

    assert_eq!(v1.state().await, WorkerState::Redundant);
    assert_eq!(container.scope().caches.read().await.keys(), vec!["static-v2"]);
}

#[tokio::test]
async fn test_activation_report_and_claim() {
    let fetcher = site();
    let (container, _events) = container(&fetcher);
    let manual = furqaan_sw::CacheConfig {
        skip_waiting: false,
        ..config("v1", &["/404.html"])
    };

    {
        let mut caches = container.scope().caches.write().await;
        caches.open("static-v0").await.unwrap();
        caches.open("dynamic-v0").await.unwrap();
    }
    container
        .scope()
        .clients
        .write()
        .await
        .add(furqaan_sw::Client::window(url::Url::parse(ORIGIN).unwrap()));

    let controller = container.register(manual).await.unwrap();
    assert_eq!(controller.state().await, WorkerState::Installed);
    assert!(container.active().await.is_none());
    assert!(container.waiting().await.is_some());

    let report = container.activate_waiting().await.unwrap();
    assert_eq!(report.deleted, vec!["dynamic-v0", "static-v0"]);
    assert!(report.failed.is_empty());
    assert_eq!(report.claimed, 1);
    assert_eq!(controller.state().await, WorkerState::Activated);

    let clients = container.scope().clients.read().await;
    assert!(clients
        .all()
        .iter()
        .all(|c| c.controller.as_deref() == Some("v1")));
}

#[tokio::test]
async fn test_activation_survives_delete_failure() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = site();
    let storage = CacheStorage::open_dir(dir.path()).await.unwrap().shared();
    {
        let mut caches = storage.write().await;
        caches.open("static-v0").await.unwrap();
        caches.open("dynamic-v0").await.unwrap();
    }
    // Replace one bucket file with a directory so removing it fails.
    let blocked = dir.path().join("static-v0.json");
    tokio::fs::remove_file(&blocked).await.unwrap();
    tokio::fs::create_dir(&blocked).await.unwrap();

    let scope = WorkerGlobalScope::new(fetcher.clone()).with_caches(storage.clone());
    let (container, _events) = ServiceWorkerContainer::new(scope);
    let manual = furqaan_sw::CacheConfig {
        skip_waiting: false,
        ..config("v1", &["/404.html"])
    };
    let controller = container.register(manual).await.unwrap();

    let report = container.activate_waiting().await.unwrap();
    assert_eq!(report.deleted, vec!["dynamic-v0"]);
    assert_eq!(report.failed, vec!["static-v0"]);
    assert_eq!(controller.state().await, WorkerState::Activated);
}

#[tokio::test]
async fn test_registering_active_version_again_is_noop() {
    let fetcher = site();
    let (container, v1) = active(&fetcher, config("v1", &["/404.html"])).await;
    let calls = fetcher.calls();

    let again = container.register(config("v1", &["/404.html"])).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&v1, &again));
    assert_eq!(fetcher.calls(), calls);
}

#[tokio::test]
async fn test_controller_lifecycle_is_one_way() {
    let fetcher = site();
    let controller =
        furqaan_sw::CacheController::new(config("v1", &["/404.html"]), scope(&fetcher)).unwrap();

    assert!(matches!(
        controller.on_activate().await,
        Err(ServiceWorkerError::StateError(_))
    ));
    controller.on_install().await.unwrap();
    assert!(controller.skip_waiting_requested());
    assert!(matches!(
        controller.on_install().await,
        Err(ServiceWorkerError::StateError(_))
    ));
    controller.on_activate().await.unwrap();
    assert!(controller.on_activate().await.is_err());
}

#[tokio::test]
async fn test_inactive_controller_declines_fetches() {
    let fetcher = site();
    let controller =
        furqaan_sw::CacheController::new(config("v1", &["/404.html"]), scope(&fetcher)).unwrap();
    controller.on_install().await.unwrap();

    let outcome = controller.on_fetch(&get("/404.html")).await.unwrap();
    assert!(outcome.response().is_none());
}

#[tokio::test]
async fn test_resume_from_persisted_storage() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = site();

    {
        let storage = CacheStorage::open_dir(dir.path()).await.unwrap().shared();
        let scope = WorkerGlobalScope::new(fetcher.clone()).with_caches(storage);
        let (container, _events) = ServiceWorkerContainer::new(scope);
        container
            .register(config("v1", &["/style.css", "/404.html"]))
            .await
            .unwrap();
    }

    fetcher.set_offline(true);
    let calls = fetcher.calls();

    let storage = CacheStorage::open_dir(dir.path()).await.unwrap().shared();
    let scope = WorkerGlobalScope::new(fetcher.clone()).with_caches(storage);
    let (container, _events) = ServiceWorkerContainer::new(scope);

    let missing = container.resume(config("v2", &["/style.css"])).await;
    assert!(matches!(missing, Err(ServiceWorkerError::NotFound(_))));

    let controller = container
        .resume(config("v1", &["/style.css", "/404.html"]))
        .await
        .unwrap();
    assert_eq!(controller.state().await, WorkerState::Activated);

    let served = respond(&controller, &get("/style.css")).await;
    assert_eq!(&served.response.body[..], b"body{}");
    assert_eq!(fetcher.calls(), calls);
}

#[tokio::test]
async fn test_cached_entries_keep_request_identity() {
    let fetcher = site();
    let (container, _v1) = active(&fetcher, config("v1", &["/style.css", "/404.html"])).await;

    let caches = container.scope().caches.read().await;
    let entry: &CacheEntry = caches
        .match_in("static-v1", &get("/style.css").cache_key())
        .unwrap();
    assert_eq!(entry.method, "GET");
    assert_eq!(entry.url, absolute("/style.css"));
    assert_eq!(entry.status, 200);
}

#[tokio::test]
async fn test_unregister_leaves_origin_uncontrolled() {
    let fetcher = site();
    let (container, v1) = active(&fetcher, config("v1", &["/404.html"])).await;

    assert!(container.unregister().await);
    assert_eq!(v1.state().await, WorkerState::Redundant);
    assert!(container.handle_fetch(&get("/404.html")).await.unwrap().response().is_none());
    assert!(!container.unregister().await);
}
