//! Stream URL resolution through the external extractor tool.
//!
//! The extractor is treated as an opaque subprocess: canonical media URL in,
//! direct audio-only URL out, bounded by a hard deadline. Resolved URLs are
//! kept in a TTL cache; the signed upstream URLs live for hours but we
//! refresh far sooner, so a stale entry is never served close to its expiry.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval, timeout};
use tracing::{debug, warn};

/// Hard deadline for a stream URL extraction.
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(90);
/// How often the URL cache drops expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Failures surfaced by the extractor boundary.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("extractor timed out after {0:?}")]
    Timeout(Duration),
    #[error("extractor exited with failure: {0}")]
    Extractor(String),
    #[error("failed to run extractor: {0}")]
    Io(#[from] std::io::Error),
    #[error("extractor returned no stream URL")]
    Empty,
}

/// Opaque resolution capability injected into the pre-fetch pipeline and the
/// streaming endpoint.
pub trait StreamResolver: Send + Sync {
    /// Resolve a canonical external URL into a direct audio-only URL.
    fn resolve(&self, url: &str) -> BoxFuture<'static, Result<String, ResolveError>>;
}

/// Production resolver shelling out to a `yt-dlp` compatible binary.
pub struct YtDlpResolver {
    program: String,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl StreamResolver for YtDlpResolver {
    fn resolve(&self, url: &str) -> BoxFuture<'static, Result<String, ResolveError>> {
        let program = self.program.clone();
        let url = url.to_string();
        Box::pin(async move {
            let output = Command::new(&program)
                .args(["--no-playlist", "-f", "bestaudio", "-g"])
                .arg(&url)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(ResolveError::Extractor(
                    stderr.lines().last().unwrap_or("unknown error").to_string(),
                ));
            }

            String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
                .ok_or(ResolveError::Empty)
        })
    }
}

/// Run a resolution under the given deadline, mapping elapse onto
/// [`ResolveError::Timeout`].
pub async fn resolve_with_timeout(
    resolver: &dyn StreamResolver,
    url: &str,
    limit: Duration,
) -> Result<String, ResolveError> {
    match timeout(limit, resolver.resolve(url)).await {
        Ok(result) => result,
        Err(_) => Err(ResolveError::Timeout(limit)),
    }
}

/// Strip playlist bookkeeping parameters so every queue entry pointing at the
/// same video shares one cache key.
pub fn canonical_media_url(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or("");
            !matches!(key, "list" | "index" | "start_radio" | "pp")
        })
        .collect();

    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{base}?{}", kept.join("&"))
    }
}

struct CachedUrl {
    url: String,
    expires_at: Instant,
}

/// TTL map from canonical media URL to resolved direct URL.
///
/// Lost-update races between concurrent writers are harmless: both produce
/// the same value for a key under normal conditions.
pub struct StreamUrlCache {
    entries: DashMap<String, CachedUrl>,
    ttl: Duration,
}

impl StreamUrlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fetch a live entry, dropping it when expired.
    pub fn get(&self, canonical: &str) -> Option<String> {
        let hit = self.entries.get(canonical)?;
        if hit.expires_at <= Instant::now() {
            drop(hit);
            self.entries.remove(canonical);
            return None;
        }
        Some(hit.url.clone())
    }

    pub fn put(&self, canonical: String, url: String) {
        self.entries.insert(
            canonical,
            CachedUrl {
                url,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Periodically sweep expired entries out of the cache.
pub fn spawn_sweeper(cache: Arc<StreamUrlCache>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.sweep();
            if removed > 0 {
                debug!(removed, "swept expired stream URLs");
            }
        }
    })
}

/// Cache-first resolution used by the pre-fetch pipeline and the streaming
/// endpoint.
pub async fn resolve_cached(
    cache: &StreamUrlCache,
    resolver: &dyn StreamResolver,
    raw_url: &str,
) -> Result<String, ResolveError> {
    let canonical = canonical_media_url(raw_url);
    if let Some(hit) = cache.get(&canonical) {
        debug!(url = %canonical, "stream URL served from cache");
        return Ok(hit);
    }

    let resolved = resolve_with_timeout(resolver, &canonical, EXTRACT_TIMEOUT).await;
    match resolved {
        Ok(url) => {
            cache.put(canonical, url.clone());
            Ok(url)
        }
        Err(err) => {
            warn!(url = %canonical, error = %err, "stream URL resolution failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FixedResolver {
        url: String,
        calls: AtomicUsize,
    }

    impl FixedResolver {
        fn new(url: &str) -> Self {
            Self {
                url: url.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl StreamResolver for FixedResolver {
        fn resolve(&self, _url: &str) -> BoxFuture<'static, Result<String, ResolveError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let url = self.url.clone();
            Box::pin(async move { Ok(url) })
        }
    }

    struct StuckResolver;

    impl StreamResolver for StuckResolver {
        fn resolve(&self, _url: &str) -> BoxFuture<'static, Result<String, ResolveError>> {
            Box::pin(async move {
                std::future::pending::<()>().await;
                unreachable!()
            })
        }
    }

    #[test]
    fn canonical_url_strips_playlist_params() {
        assert_eq!(
            canonical_media_url("https://video.example/watch?v=abc&list=PL1&index=4"),
            "https://video.example/watch?v=abc"
        );
        assert_eq!(
            canonical_media_url("https://video.example/watch?list=PL1"),
            "https://video.example/watch"
        );
        assert_eq!(
            canonical_media_url("https://video.example/watch?v=abc"),
            "https://video.example/watch?v=abc"
        );
        assert_eq!(
            canonical_media_url("https://video.example/abc"),
            "https://video.example/abc"
        );
    }

    #[tokio::test]
    async fn resolve_cached_hits_cache_on_second_call() {
        let cache = StreamUrlCache::new(Duration::from_secs(300));
        let resolver = FixedResolver::new("https://cdn.example/audio.m4a");

        let first = resolve_cached(&cache, &resolver, "https://video.example/watch?v=abc&list=x")
            .await
            .unwrap();
        let second = resolve_cached(&cache, &resolver, "https://video.example/watch?v=abc")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            resolver.calls.load(Ordering::SeqCst),
            1,
            "playlist params share the canonical cache key"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire_after_ttl() {
        let cache = StreamUrlCache::new(Duration::from_secs(300));
        cache.put("k".into(), "v".into());
        assert_eq!(cache.get("k"), Some("v".into()));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_expired_entries() {
        let cache = StreamUrlCache::new(Duration::from_secs(300));
        cache.put("old".into(), "v1".into());
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.put("fresh".into(), "v2".into());
        tokio::time::advance(Duration::from_secs(150)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.get("fresh"), Some("v2".into()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_times_out_with_the_configured_deadline() {
        let err = resolve_with_timeout(&StuckResolver, "x", Duration::from_secs(90))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Timeout(limit) if limit == Duration::from_secs(90)));
    }
}
