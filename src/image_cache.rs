//! Deduplicated loader for small brand assets.

use crate::{ExportError, Metrics};
use async_trait::async_trait;
use dashmap::DashMap;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::debug;

/// Fetches the raw bytes of an asset.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ExportError>;
}

/// Fetches `http(s)` assets with reqwest and `file` URLs or plain paths from
/// disk. Requests carry no cookies or credentials, so the decoded pixels are
/// always usable for composition.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ExportError::LoadError(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ExportError> {
        let path = match url::Url::parse(url) {
            Ok(parsed) if parsed.scheme() == "file" => parsed
                .to_file_path()
                .map_err(|_| ExportError::LoadError(format!("invalid file URL: {}", url)))?,
            Ok(_) => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| ExportError::LoadError(e.to_string()))?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| ExportError::LoadError(e.to_string()))?;
                return Ok(bytes.to_vec());
            }
            Err(_) => url.into(),
        };

        tokio::fs::read(&path)
            .await
            .map_err(|e| ExportError::LoadError(format!("{}: {}", path.display(), e)))
    }
}

type Slot = Arc<OnceCell<Arc<RgbaImage>>>;

/// Decoded images memoized by a caller-supplied key.
///
/// The first successful load for a key wins; later calls with the same key
/// return it without fetching, whatever URL they pass. Failed loads leave the
/// key empty so the next call tries again.
pub struct ImageCache {
    entries: DashMap<String, Slot>,
    fetcher: Arc<dyn AssetFetcher>,
    metrics: Arc<Metrics>,
}

impl ImageCache {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, metrics: Arc<Metrics>) -> Self {
        Self {
            entries: DashMap::new(),
            fetcher,
            metrics,
        }
    }

    pub async fn load(
        &self,
        url: &str,
        key: &str,
        load_timeout: Duration,
    ) -> Result<Arc<RgbaImage>, ExportError> {
        // Clone the slot out so no map guard is held across the await
        let slot: Slot = Arc::clone(self.entries.entry(key.to_string()).or_default().value());

        if let Some(image) = slot.get() {
            debug!("Image cache hit for key {}", key);
            self.metrics.record_cache(true);
            return Ok(Arc::clone(image));
        }

        self.metrics.record_cache(false);
        let loaded = slot
            .get_or_try_init(|| async {
                let decoded = timeout(load_timeout, self.fetch_and_decode(url))
                    .await
                    .map_err(|_| ExportError::LoadTimeout {
                        url: url.to_string(),
                        timeout: load_timeout,
                    })??;
                debug!(
                    "Loaded image {} ({}x{}) for key {}",
                    url,
                    decoded.width(),
                    decoded.height(),
                    key
                );
                Ok::<_, ExportError>(Arc::new(decoded))
            })
            .await;

        match loaded {
            Ok(image) => Ok(Arc::clone(image)),
            Err(e) => {
                // Drop the empty slot unless another load has replaced or filled it
                self.entries
                    .remove_if(key, |_, current| Arc::ptr_eq(current, &slot) && !current.initialized());
                Err(e)
            }
        }
    }

    async fn fetch_and_decode(&self, url: &str) -> Result<RgbaImage, ExportError> {
        let bytes = self.fetcher.fetch(url).await?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| ExportError::LoadError(format!("{}: {}", url, e)))?;
        Ok(decoded.to_rgba8())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|slot| slot.initialized())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgba};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    struct CountingFetcher {
        calls: AtomicUsize,
        delay: Duration,
        body: Vec<u8>,
    }

    #[async_trait]
    impl AssetFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, ExportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.body.clone())
        }
    }

    fn cache_with(fetcher: Arc<CountingFetcher>) -> ImageCache {
        ImageCache::new(fetcher, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn test_same_key_is_fetched_once() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            body: png_bytes(22, 16),
        });
        let cache = cache_with(fetcher.clone());

        let first = cache
            .load("https://a.example/logo.png", "dark", Duration::from_secs(5))
            .await
            .unwrap();
        let second = cache
            .load("https://b.example/other.png", "dark", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!((first.width(), first.height()), (22, 16));
        assert!(cache.contains("dark"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_asset_times_out() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(10),
            body: png_bytes(1, 1),
        });
        let cache = cache_with(fetcher);

        let result = cache
            .load("https://slow.example/logo.png", "light", Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(ExportError::LoadTimeout { .. })));
        assert!(!cache.contains("light"));
        assert!(cache.entries.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_asset_and_clear() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            body: b"not an image".to_vec(),
        });
        let cache = cache_with(fetcher.clone());

        let result = cache.load("x", "bad", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ExportError::LoadError(_))));
        assert!(!cache.entries.contains_key("bad"));
        let _ = cache.load("x", "bad", Duration::from_secs(5)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(cache.entries.is_empty());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.png");
        std::fs::write(&path, png_bytes(4, 3)).unwrap();

        let cache = ImageCache::new(Arc::new(HttpFetcher::new().unwrap()), Arc::new(Metrics::new()));
        let image = cache
            .load(path.to_str().unwrap(), "local", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(image.dimensions(), (4, 3));
    }
}
