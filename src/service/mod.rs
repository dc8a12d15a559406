//! URL shortening service
//!
//! `UrlShortener` owns alias allocation on top of any `Storage`: it draws
//! candidates from an `AliasGenerator`, retries on alias collisions, and turns
//! an already-shortened long URL into a conflict outcome instead of a new row.

pub mod deletion;

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::alias::{AliasGenerator, RandomAlias};
use crate::config::{DeletionConfig, ShortenerConfig};
use crate::models::{OriginalUrl, ShortenedEntry, UserUrl};
use crate::storage::{Storage, StorageError};

pub use deletion::DeletionQueue;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("alias {0:?} not found")]
    NotFound(String),
    #[error("no free alias after {attempts} attempts")]
    AllocationFailed {
        attempts: usize,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of shortening one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShortenOutcome {
    /// A new alias was stored
    Created(String),
    /// The owner had already shortened this URL; carries the existing short URL
    AlreadyExists(String),
}

impl ShortenOutcome {
    pub fn short_url(&self) -> &str {
        match self {
            Self::Created(url) | Self::AlreadyExists(url) => url,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Result of resolving an alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Active(String),
    /// The alias exists but its owner deleted it
    Gone,
}

pub struct UrlShortener {
    storage: Arc<dyn Storage>,
    generator: Arc<dyn AliasGenerator>,
    base_url: url::Url,
    max_retries: usize,
    deletions: DeletionQueue,
}

/// Parse an absolute http(s) URL with a host, ignoring surrounding whitespace
fn parse_http_url(raw: &str) -> Result<url::Url, ServiceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::InvalidInput("empty url".to_string()));
    }

    let parsed = url::Url::parse(trimmed)
        .map_err(|e| ServiceError::InvalidInput(format!("{trimmed:?} is not a valid url: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ServiceError::InvalidInput(format!(
            "unsupported scheme {:?}",
            parsed.scheme()
        )));
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ServiceError::InvalidInput(format!("{trimmed:?} has no host")));
    }

    Ok(parsed)
}

/// Validate a long URL and return the form that gets stored
fn validate_long_url(long_url: &str) -> Result<&str, ServiceError> {
    parse_http_url(long_url)?;
    Ok(long_url.trim())
}

impl UrlShortener {
    /// Build the service and start its deletion workers
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        storage: Arc<dyn Storage>,
        shortener: &ShortenerConfig,
        deletion: &DeletionConfig,
    ) -> Result<Self, ServiceError> {
        let mut base_url = parse_http_url(shortener.base_url.trim().trim_end_matches('/'))
            .map_err(|e| ServiceError::InvalidInput(format!("base url: {e}")))?;
        base_url.set_query(None);
        base_url.set_fragment(None);

        let deletions = DeletionQueue::start(Arc::clone(&storage), deletion);

        Ok(Self {
            storage,
            generator: Arc::new(RandomAlias::new(shortener.alias_length)),
            base_url,
            max_retries: shortener.max_retries.max(1),
            deletions,
        })
    }

    /// Replace the alias generator
    pub fn with_generator(mut self, generator: Arc<dyn AliasGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Join the alias onto the base URL as one percent-encoded path segment
    fn short_url_of(&self, alias: &str) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(alias);
        }
        url.into()
    }

    pub async fn shorten_url(
        &self,
        long_url: &str,
        owner_id: &str,
    ) -> Result<ShortenOutcome, ServiceError> {
        let long_url = validate_long_url(long_url)?;

        let mut last_error = None;
        for attempt in 1..=self.max_retries {
            let candidate = self.generator.generate();

            match self.storage.store(&candidate, long_url, owner_id).await {
                Ok(alias) => return Ok(ShortenOutcome::Created(self.short_url_of(&alias))),
                Err(StorageError::Conflict { existing }) => {
                    return Ok(ShortenOutcome::AlreadyExists(self.short_url_of(&existing)));
                }
                Err(e @ StorageError::DuplicateAlias(_)) => {
                    debug!("Alias collision on attempt {}: {}", attempt, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let attempts = self.max_retries;
        warn!("Giving up on alias allocation after {} attempts", attempts);
        Err(ServiceError::AllocationFailed {
            attempts,
            source: last_error.unwrap_or_else(|| {
                StorageError::Other(anyhow::anyhow!("no allocation attempt was made"))
            }),
        })
    }

    /// Store caller-named entries in one all-or-nothing write
    ///
    /// Correlation ids become the aliases verbatim, so there is no collision
    /// retry here.
    pub async fn store_batch_url(
        &self,
        entries: &[OriginalUrl],
        owner_id: &str,
    ) -> Result<Vec<ShortenedEntry>, ServiceError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let entries = entries
            .iter()
            .map(|entry| {
                if matches!(entry.correlation_id.as_str(), "" | "." | "..") {
                    return Err(ServiceError::InvalidInput(format!(
                        "correlation_id {:?} cannot be used as an alias",
                        entry.correlation_id
                    )));
                }
                Ok(OriginalUrl {
                    correlation_id: entry.correlation_id.clone(),
                    original_url: validate_long_url(&entry.original_url)?.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let shortened = entries
            .iter()
            .map(|entry| ShortenedEntry {
                correlation_id: entry.correlation_id.clone(),
                short_url: self.short_url_of(&entry.correlation_id),
            })
            .collect();

        self.storage.store_batch(&entries, owner_id).await?;
        Ok(shortened)
    }

    pub async fn find_by_shortened(&self, alias: &str) -> Result<Resolution, ServiceError> {
        match self.storage.get(alias).await {
            Ok(record) if record.is_deleted => Ok(Resolution::Gone),
            Ok(record) => Ok(Resolution::Active(record.long_url)),
            Err(StorageError::NotFound(alias)) => Err(ServiceError::NotFound(alias)),
            Err(e) => Err(e.into()),
        }
    }

    /// Live aliases of one owner, with their full short URLs
    pub async fn find_by_user_id(&self, owner_id: &str) -> Result<Vec<UserUrl>, ServiceError> {
        if owner_id.is_empty() {
            return Err(ServiceError::InvalidInput("owner id is required".to_string()));
        }

        let urls = self.storage.get_by_owner(owner_id).await?;
        Ok(urls
            .into_iter()
            .map(|url| UserUrl {
                short_url: self.short_url_of(&url.correlation_id),
                original_url: url.original_url,
            })
            .collect())
    }

    /// Queue soft deletes and return once they are enqueued
    pub async fn delete_batch(&self, aliases: Vec<String>, owner_id: &str) {
        if owner_id.is_empty() {
            warn!("Ignoring deletion of {} aliases without an owner", aliases.len());
            return;
        }
        if aliases.is_empty() {
            return;
        }
        self.deletions.enqueue(owner_id, aliases).await;
    }

    pub async fn ping_db(&self) -> Result<(), ServiceError> {
        self.storage.ping().await?;
        Ok(())
    }

    /// Stop accepting deletions and wait for pending ones to be applied
    pub async fn shutdown(&self) {
        info!("Shutting down url shortener");
        self.deletions.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::{MockStorage, StoreBehaviour};
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out `fixed-0`, `fixed-1`, ...
    struct SequenceAlias(AtomicUsize);

    impl AliasGenerator for SequenceAlias {
        fn generate(&self) -> String {
            format!("fixed-{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn shortener(storage: Arc<dyn Storage>) -> UrlShortener {
        let config = ShortenerConfig {
            base_url: "http://localhost:8080/".to_string(),
            ..ShortenerConfig::default()
        };
        UrlShortener::new(storage, &config, &DeletionConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_shorten_creates_short_url() {
        let storage = Arc::new(MemoryStorage::default());
        let service = shortener(storage)
            .with_generator(Arc::new(SequenceAlias(AtomicUsize::new(0))));

        let outcome = service
            .shorten_url("https://example.com/page", "alice")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ShortenOutcome::Created("http://localhost:8080/fixed-0".to_string())
        );
        assert_eq!(
            service.find_by_shortened("fixed-0").await.unwrap(),
            Resolution::Active("https://example.com/page".to_string())
        );
    }

    #[tokio::test]
    async fn test_shorten_same_url_returns_existing() {
        let service = shortener(Arc::new(MemoryStorage::default()));

        let first = service.shorten_url("https://example.com", "").await.unwrap();
        let second = service.shorten_url("https://example.com", "").await.unwrap();

        assert!(first.is_created());
        assert_eq!(second, ShortenOutcome::AlreadyExists(first.short_url().to_string()));
    }

    #[tokio::test]
    async fn test_retry_stops_after_max_attempts() {
        let storage = Arc::new(MockStorage::new(StoreBehaviour::AlwaysDuplicate));
        let service = shortener(storage.clone());

        let err = service
            .shorten_url("https://example.com", "alice")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::AllocationFailed {
                attempts: 3,
                source: StorageError::DuplicateAlias(_)
            }
        ));
        assert_eq!(storage.store_calls(), 3);
    }

    #[tokio::test]
    async fn test_conflict_returns_without_retry() {
        let storage = Arc::new(MockStorage::new(StoreBehaviour::Conflict(
            "existing".to_string(),
        )));
        let service = shortener(storage.clone());

        let outcome = service
            .shorten_url("https://example.com", "alice")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ShortenOutcome::AlreadyExists("http://localhost:8080/existing".to_string())
        );
        assert_eq!(storage.store_calls(), 1);
    }

    #[tokio::test]
    async fn test_backend_error_is_not_retried() {
        let storage = Arc::new(MockStorage::new(StoreBehaviour::Fail));
        let service = shortener(storage.clone());

        let err = service
            .shorten_url("https://example.com", "alice")
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Storage(StorageError::Other(_))));
        assert_eq!(storage.store_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_never_reaches_storage() {
        let storage = Arc::new(MockStorage::new(StoreBehaviour::Accept));
        let service = shortener(storage.clone());

        for input in ["", "   ", "not a url", "ftp://example.com/file", "mailto:a@b.c"] {
            let err = service.shorten_url(input, "alice").await.unwrap_err();
            assert!(
                matches!(err, ServiceError::InvalidInput(_)),
                "{input:?} gave {err:?}"
            );
        }
        assert_eq!(storage.store_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_base_url_is_rejected() {
        let config = ShortenerConfig {
            base_url: "localhost".to_string(),
            ..ShortenerConfig::default()
        };
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());

        assert!(matches!(
            UrlShortener::new(storage, &config, &DeletionConfig::default()),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_store_batch_url_uses_correlation_ids() {
        let service = shortener(Arc::new(MemoryStorage::default()));
        let batch = vec![
            OriginalUrl {
                correlation_id: "one".to_string(),
                original_url: "https://one.example".to_string(),
            },
            OriginalUrl {
                correlation_id: "two".to_string(),
                original_url: "https://two.example".to_string(),
            },
        ];

        let shortened = service.store_batch_url(&batch, "alice").await.unwrap();

        assert_eq!(shortened.len(), 2);
        assert_eq!(shortened[0].correlation_id, "one");
        assert_eq!(shortened[1].short_url, "http://localhost:8080/two");
        assert_eq!(service.find_by_user_id("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_store_batch_url_validates_before_writing() {
        let storage = Arc::new(MemoryStorage::default());
        let service = shortener(storage.clone());
        let batch = vec![
            OriginalUrl {
                correlation_id: "good".to_string(),
                original_url: "https://good.example".to_string(),
            },
            OriginalUrl {
                correlation_id: "bad".to_string(),
                original_url: "nope".to_string(),
            },
        ];

        assert!(matches!(
            service.store_batch_url(&batch, "alice").await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(storage.is_empty().await);
        assert!(service.store_batch_url(&[], "alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_urls_escape_correlation_ids() {
        let service = shortener(Arc::new(MemoryStorage::default()));
        let batch = vec![OriginalUrl {
            correlation_id: "a b?c/../d".to_string(),
            original_url: "https://odd.example".to_string(),
        }];

        let shortened = service.store_batch_url(&batch, "alice").await.unwrap();
        assert_eq!(
            shortened[0].short_url,
            "http://localhost:8080/a%20b%3Fc%2F..%2Fd"
        );

        let listed = service.find_by_user_id("alice").await.unwrap();
        assert_eq!(listed[0].short_url, shortened[0].short_url);

        let dots = vec![OriginalUrl {
            correlation_id: "..".to_string(),
            original_url: "https://dots.example".to_string(),
        }];
        assert!(matches!(
            service.store_batch_url(&dots, "alice").await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_base_url_with_path_prefix() {
        let config = ShortenerConfig {
            base_url: "https://trim.example/s/".to_string(),
            ..ShortenerConfig::default()
        };
        let service = UrlShortener::new(
            Arc::new(MemoryStorage::default()),
            &config,
            &DeletionConfig::default(),
        )
        .unwrap()
        .with_generator(Arc::new(SequenceAlias(AtomicUsize::new(0))));

        let outcome = service.shorten_url("https://a.example", "").await.unwrap();
        assert_eq!(outcome.short_url(), "https://trim.example/s/fixed-0");
    }

    #[tokio::test]
    async fn test_surrounding_whitespace_is_not_a_new_url() {
        let storage = Arc::new(MemoryStorage::default());
        let service = shortener(storage.clone());

        let first = service.shorten_url(" https://a.io ", "alice").await.unwrap();
        let second = service.shorten_url("https://a.io", "alice").await.unwrap();

        assert!(first.is_created());
        assert_eq!(second, ShortenOutcome::AlreadyExists(first.short_url().to_string()));
        assert_eq!(
            service.find_by_user_id("alice").await.unwrap()[0].original_url,
            "https://a.io"
        );

        let batch = vec![OriginalUrl {
            correlation_id: "padded".to_string(),
            original_url: "\thttps://b.io\n".to_string(),
        }];
        service.store_batch_url(&batch, "alice").await.unwrap();
        assert_eq!(
            service.find_by_shortened("padded").await.unwrap(),
            Resolution::Active("https://b.io".to_string())
        );
        assert_eq!(storage.len().await, 2);
    }

    #[tokio::test]
    async fn test_find_unknown_alias() {
        let service = shortener(Arc::new(MemoryStorage::default()));
        assert!(matches!(
            service.find_by_shortened("missing").await,
            Err(ServiceError::NotFound(alias)) if alias == "missing"
        ));
    }

    #[tokio::test]
    async fn test_delete_batch_marks_gone_after_shutdown() {
        let service = shortener(Arc::new(MemoryStorage::default()))
            .with_generator(Arc::new(SequenceAlias(AtomicUsize::new(0))));

        service.shorten_url("https://a.example", "alice").await.unwrap();
        service.shorten_url("https://b.example", "alice").await.unwrap();

        service
            .delete_batch(vec!["fixed-0".to_string()], "alice")
            .await;
        service.shutdown().await;

        assert_eq!(
            service.find_by_shortened("fixed-0").await.unwrap(),
            Resolution::Gone
        );
        let listed = service.find_by_user_id("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].short_url, "http://localhost:8080/fixed-1");
    }

    #[tokio::test]
    async fn test_delete_without_owner_is_ignored() {
        let storage = Arc::new(MockStorage::new(StoreBehaviour::Accept));
        let service = shortener(storage.clone());

        service.delete_batch(vec!["abc".to_string()], "").await;
        service.shutdown().await;

        assert!(storage.flushed().is_empty());
    }
}
