//! Tests for the probe managers.

mod common;

use common::{eventually, json, manager_config, node_id, CountingFetcher, FEED_V1, FEED_V2};
use netmesh_probe::{
    PassiveProbeManager, ProbeDirectory, ProbeError, ProbeManager, ProbeManagerConfig,
    ScheduledProbeManager,
};
use netmesh_types::{CoherenceSpecification, MeshObjectIdentifier};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const FEED: &str = "test://feed";

fn counting_fetcher() -> Arc<CountingFetcher> {
    let fetcher = Arc::new(CountingFetcher::default());
    fetcher.inner.insert(node_id(FEED), json(FEED_V1));
    fetcher
}

fn item(local: &str) -> MeshObjectIdentifier {
    MeshObjectIdentifier::parse(&format!("{FEED}#{local}")).unwrap()
}

#[tokio::test]
async fn obtain_for_runs_the_probe_once_and_caches() {
    let fetcher = counting_fetcher();
    let manager = PassiveProbeManager::new(manager_config(), fetcher.clone(), ProbeDirectory::json());

    let first = manager.obtain_for(&node_id(FEED), None).await.unwrap();
    assert_eq!(fetcher.fetches(), 1);
    assert!(first.base().find_locally(&item("item-1")).is_some());

    let second = manager.obtain_for(&node_id(FEED), None).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fetcher.fetches(), 1);
    assert_eq!(manager.shadow_identifiers(), vec![node_id(FEED)]);
}

#[tokio::test]
async fn concurrent_obtains_create_one_shadow() {
    let fetcher = counting_fetcher();
    let manager = Arc::new(PassiveProbeManager::new(
        manager_config(),
        fetcher.clone(),
        ProbeDirectory::json(),
    ));

    let id = node_id(FEED);
    let (a, b) = tokio::join!(manager.obtain_for(&id, None), manager.obtain_for(&id, None));
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(fetcher.fetches(), 1);
}

#[tokio::test]
async fn failed_first_run_is_not_cached() {
    let fetcher = Arc::new(CountingFetcher::default());
    fetcher.inner.insert(node_id(FEED), json("not json"));
    let manager = PassiveProbeManager::new(manager_config(), fetcher.clone(), ProbeDirectory::json());

    let result = manager.obtain_for(&node_id(FEED), None).await;
    assert!(matches!(result, Err(ProbeError::Syntax(_))));
    assert!(manager.get(&node_id(FEED)).is_none());
    assert!(manager.shadow_identifiers().is_empty());

    fetcher.inner.insert(node_id(FEED), json(FEED_V1));
    assert!(manager.obtain_for(&node_id(FEED), None).await.is_ok());
    assert_eq!(fetcher.fetches(), 2);
}

#[tokio::test]
async fn unsupported_resources_are_not_managed() {
    let manager = PassiveProbeManager::new(
        manager_config(),
        counting_fetcher(),
        ProbeDirectory::json(),
    );
    let other = node_id("test://elsewhere");
    assert!(!manager.manages(&other));
    assert!(matches!(
        manager.obtain_for(&other, None).await,
        Err(ProbeError::NotProbeManaged(_))
    ));
}

#[tokio::test]
async fn passive_manager_reruns_only_when_asked() {
    let fetcher = counting_fetcher();
    let manager = PassiveProbeManager::new(manager_config(), fetcher.clone(), ProbeDirectory::json());
    let coherence = CoherenceSpecification::Periodic { period_ms: 20 };
    let shadow = manager
        .obtain_for(&node_id(FEED), Some(coherence))
        .await
        .unwrap();

    fetcher.inner.insert(node_id(FEED), json(FEED_V2));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.fetches(), 1);
    assert!(shadow.base().find_locally(&item("item-2")).is_none());

    let delay = manager.update_now(&node_id(FEED)).await.unwrap();
    assert_eq!(delay, Some(Duration::from_millis(20)));
    assert!(shadow.base().find_locally(&item("item-2")).is_some());
    assert!(shadow.base().find_locally(&item("item-1")).is_none());
}

#[tokio::test]
async fn update_now_of_unknown_shadow_fails() {
    let manager = PassiveProbeManager::new(
        manager_config(),
        counting_fetcher(),
        ProbeDirectory::json(),
    );
    assert!(matches!(
        manager.update_now(&node_id(FEED)).await,
        Err(ProbeError::NotFound(_))
    ));
}

#[tokio::test]
async fn scheduled_manager_reruns_periodically() {
    let fetcher = counting_fetcher();
    let manager = ScheduledProbeManager::start(manager_config(), fetcher.clone(), ProbeDirectory::json());
    let coherence = CoherenceSpecification::Periodic { period_ms: 30 };
    let shadow = manager
        .obtain_for(&node_id(FEED), Some(coherence))
        .await
        .unwrap();
    assert!(manager.is_scheduled(&node_id(FEED)));

    fetcher.inner.insert(node_id(FEED), json(FEED_V2));
    eventually("the scheduled re-run", || {
        shadow.base().find_locally(&item("item-2")).is_some()
    })
    .await;
    assert!(fetcher.fetches() >= 2);
}

#[tokio::test]
async fn one_time_only_shadows_are_not_rescheduled() {
    let fetcher = counting_fetcher();
    let manager = ScheduledProbeManager::start(manager_config(), fetcher.clone(), ProbeDirectory::json());
    manager
        .obtain_for(&node_id(FEED), Some(CoherenceSpecification::OneTimeOnly))
        .await
        .unwrap();

    assert!(!manager.is_scheduled(&node_id(FEED)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.fetches(), 1);
}

#[tokio::test]
async fn removing_a_shadow_stops_its_schedule() {
    let fetcher = counting_fetcher();
    let manager = ScheduledProbeManager::start(manager_config(), fetcher.clone(), ProbeDirectory::json());
    manager
        .obtain_for(&node_id(FEED), Some(CoherenceSpecification::Periodic { period_ms: 20 }))
        .await
        .unwrap();

    assert!(manager.remove(&node_id(FEED)).await);
    assert!(!manager.remove(&node_id(FEED)).await);
    assert!(!manager.is_scheduled(&node_id(FEED)));
    assert!(manager.get(&node_id(FEED)).is_none());

    let fetches = fetcher.fetches();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.fetches(), fetches);
}

#[tokio::test]
async fn unneeded_shadows_expire() {
    let manager = PassiveProbeManager::new(
        manager_config(),
        counting_fetcher(),
        ProbeDirectory::json(),
    );
    manager.obtain_for(&node_id(FEED), None).await.unwrap();

    // The first check only notices that nobody needs the shadow.
    assert!(manager.expire_unneeded().await.is_empty());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.expire_unneeded().await, vec![node_id(FEED)]);
    assert!(manager.get(&node_id(FEED)).is_none());
    assert!(!manager.network().is_attached(&node_id(FEED)));
}

#[tokio::test]
async fn shadows_never_expire_without_a_limit() {
    let config = ProbeManagerConfig {
        time_not_needed_till_expires: None,
        ..manager_config()
    };
    let manager = PassiveProbeManager::new(config, counting_fetcher(), ProbeDirectory::json());
    manager.obtain_for(&node_id(FEED), None).await.unwrap();

    manager.expire_unneeded().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(manager.expire_unneeded().await.is_empty());
    assert!(manager.get(&node_id(FEED)).is_some());
}

#[tokio::test]
async fn scheduled_manager_expires_on_its_own() {
    let manager = ScheduledProbeManager::start(
        manager_config(),
        counting_fetcher(),
        ProbeDirectory::json(),
    );
    manager.obtain_for(&node_id(FEED), None).await.unwrap();

    eventually("the shadow to expire", || manager.get(&node_id(FEED)).is_none()).await;
}
