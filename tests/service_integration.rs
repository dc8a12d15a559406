//! End-to-end service tests over real backends

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use trimurl::config::{DeletionConfig, ShortenerConfig};
use trimurl::models::OriginalUrl;
use trimurl::service::{Resolution, ServiceError, ShortenOutcome, UrlShortener};
use trimurl::storage::{MemoryStorage, SqliteStorage, Storage, StorageError};

fn shortener_config() -> ShortenerConfig {
    ShortenerConfig {
        base_url: "https://trim.example/".to_string(),
        ..ShortenerConfig::default()
    }
}

fn fast_deletion() -> DeletionConfig {
    DeletionConfig {
        flush_interval_ms: 20,
        ..DeletionConfig::default()
    }
}

async fn sqlite_service() -> UrlShortener {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    UrlShortener::new(Arc::new(storage), &shortener_config(), &fast_deletion()).unwrap()
}

fn alias_of(short_url: &str) -> &str {
    short_url.rsplit('/').next().unwrap()
}

#[tokio::test]
async fn test_shorten_resolve_and_conflict_sqlite() {
    let service = sqlite_service().await;

    let created = service
        .shorten_url("https://www.rust-lang.org/learn", "alice")
        .await
        .unwrap();
    let ShortenOutcome::Created(short_url) = &created else {
        panic!("expected a new alias, got {created:?}");
    };
    assert!(short_url.starts_with("https://trim.example/"));

    let alias = alias_of(short_url);
    assert_eq!(alias.len(), 8);
    assert!(alias.chars().all(|c| c.is_ascii_alphabetic()));

    assert_eq!(
        service.find_by_shortened(alias).await.unwrap(),
        Resolution::Active("https://www.rust-lang.org/learn".to_string())
    );

    let again = service
        .shorten_url("https://www.rust-lang.org/learn", "alice")
        .await
        .unwrap();
    assert_eq!(again, ShortenOutcome::AlreadyExists(short_url.clone()));

    service.shutdown().await;
}

#[tokio::test]
async fn test_delete_hides_from_listing_and_resolves_gone() {
    let service = sqlite_service().await;

    let a = service.shorten_url("https://a.example", "bob").await.unwrap();
    let b = service.shorten_url("https://b.example", "bob").await.unwrap();
    let c = service.shorten_url("https://c.example", "carol").await.unwrap();

    // Carol's alias is not Bob's to delete
    service
        .delete_batch(
            vec![
                alias_of(a.short_url()).to_string(),
                alias_of(c.short_url()).to_string(),
            ],
            "bob",
        )
        .await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        service.find_by_shortened(alias_of(a.short_url())).await.unwrap(),
        Resolution::Gone
    );
    assert!(matches!(
        service.find_by_shortened(alias_of(c.short_url())).await.unwrap(),
        Resolution::Active(_)
    ));

    let listed = service.find_by_user_id("bob").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].short_url, b.short_url());
    assert_eq!(listed[0].original_url, "https://b.example");

    service.shutdown().await;
}

#[tokio::test]
async fn test_batch_then_listing_memory() {
    let service = UrlShortener::new(
        Arc::new(MemoryStorage::default()),
        &shortener_config(),
        &DeletionConfig::default(),
    )
    .unwrap();

    let batch = vec![
        OriginalUrl {
            correlation_id: "abc123".to_string(),
            original_url: "https://a.example".to_string(),
        },
        OriginalUrl {
            correlation_id: "xyz789".to_string(),
            original_url: "https://b.example".to_string(),
        },
    ];
    let shortened = service.store_batch_url(&batch, "dave").await.unwrap();
    assert_eq!(shortened[0].short_url, "https://trim.example/abc123");

    // Same ids again: the whole batch is rejected
    let err = service.store_batch_url(&batch, "erin").await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Storage(StorageError::DuplicateAlias(_))
    ));
    assert!(service.find_by_user_id("erin").await.unwrap().is_empty());

    let listed: HashSet<String> = service
        .find_by_user_id("dave")
        .await
        .unwrap()
        .into_iter()
        .map(|url| url.short_url)
        .collect();
    assert!(listed.contains("https://trim.example/xyz789"));
    assert_eq!(listed.len(), 2);

    service.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_shortening_yields_distinct_aliases() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
    let service = Arc::new(
        UrlShortener::new(storage, &shortener_config(), &DeletionConfig::default()).unwrap(),
    );

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .shorten_url(&format!("https://example.com/{i}"), "")
                    .await
            })
        })
        .collect();

    let mut aliases = HashSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.is_created());
        aliases.insert(outcome.short_url().to_string());
    }
    assert_eq!(aliases.len(), 50);

    service.shutdown().await;
}

#[tokio::test]
async fn test_ping_db() {
    let service = sqlite_service().await;
    service.ping_db().await.unwrap();
    service.shutdown().await;
}
