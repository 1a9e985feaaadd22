//! Selector fallback resolution
//!
//! The browser engine is reached through [`ElementQuery`], the one
//! engine-dependent operation the resolver needs. Everything else here is
//! engine-agnostic: try the primary, walk the fallbacks, record what healed.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{HealError, HealResult};
use crate::learning::LearningStore;
use crate::selector::SelectorChain;

/// Default per-attempt wait, matching the usual auto-wait of browser drivers
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Query primitive of the automation engine.
#[async_trait]
pub trait ElementQuery: Send + Sync {
    /// Engine-side reference to a located element
    type Handle: Send;

    /// Wait up to `timeout` for `selector`.
    ///
    /// Returns `Ok(Some(handle))` if matched, `Ok(None)` if nothing matched in
    /// time, or `Err` when the engine rejected the query.
    async fn wait_for(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> HealResult<Option<Self::Handle>>;
}

/// Element located by a chain
#[derive(Debug)]
pub struct Resolved<H> {
    pub handle: H,
    /// Selector that matched
    pub selector: String,
    /// Whether a fallback had to be used
    pub healed: bool,
    /// Number of selectors tried, including the one that matched
    pub attempts: usize,
}

/// Resolves selector chains against one worker's page and keeps that
/// worker's learnings.
pub struct SelectorResolver<Q: ElementQuery> {
    engine: Q,
    store: LearningStore,
    attempt_timeout: Duration,
}

impl<Q: ElementQuery> SelectorResolver<Q> {
    pub fn new(engine: Q, store: LearningStore) -> Self {
        Self {
            engine,
            store,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Q {
        &self.engine
    }

    pub fn store(&self) -> &LearningStore {
        &self.store
    }

    /// Hand the learnings back for flushing at end of run
    pub fn into_store(self) -> LearningStore {
        self.store
    }

    /// Try `primary`, then each fallback in order.
    ///
    /// A fallback hit is recorded as a learning; a primary hit or total
    /// exhaustion records nothing.
    pub async fn resolve(
        &mut self,
        primary: &str,
        fallbacks: &[String],
    ) -> HealResult<Resolved<Q::Handle>> {
        self.resolve_chain(&SelectorChain::new(primary, fallbacks.to_vec()))
            .await
    }

    pub async fn resolve_chain(&mut self, chain: &SelectorChain) -> HealResult<Resolved<Q::Handle>> {
        let primary = chain.primary.as_str();
        let mut attempted: Vec<String> = Vec::with_capacity(chain.fallbacks.len() + 1);

        for selector in chain.selectors() {
            if attempted.iter().any(|s| s == selector) {
                continue;
            }
            attempted.push(selector.to_string());

            if let Some(handle) = self.attempt(selector).await {
                let healed = selector != primary;
                if healed {
                    info!("Healed '{}' with fallback '{}'", primary, selector);
                    self.store.record(primary, selector);
                }
                return Ok(Resolved {
                    handle,
                    selector: selector.to_string(),
                    healed,
                    attempts: attempted.len(),
                });
            }
        }

        warn!(
            "No selector resolved for '{}' after {} attempt(s)",
            primary,
            attempted.len()
        );
        Err(HealError::NoSelectorResolved {
            primary: primary.to_string(),
            attempted,
        })
    }

    /// One bounded attempt. The engine future is dropped as soon as the
    /// timeout fires.
    async fn attempt(&self, selector: &str) -> Option<Q::Handle> {
        let start = Instant::now();
        let query = self.engine.wait_for(selector, self.attempt_timeout);

        match tokio::time::timeout(self.attempt_timeout, query).await {
            Ok(Ok(Some(handle))) => {
                debug!("'{}' resolved in {} ms", selector, start.elapsed().as_millis());
                Some(handle)
            }
            Ok(Ok(None)) => {
                debug!("'{}' did not match", selector);
                None
            }
            Ok(Err(e)) => {
                debug!("'{}' query failed: {}", selector, e);
                None
            }
            Err(_) => {
                debug!(
                    "'{}' timed out after {} ms",
                    selector,
                    self.attempt_timeout.as_millis()
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Page double: selectors map to element ids, optionally after a delay
    #[derive(Default)]
    struct FakePage {
        elements: HashMap<String, (u32, Duration)>,
        invalid: Vec<String>,
        queried: Mutex<Vec<String>>,
    }

    impl FakePage {
        fn with(mut self, selector: &str, id: u32) -> Self {
            self.elements.insert(selector.to_string(), (id, Duration::ZERO));
            self
        }

        fn with_delay(mut self, selector: &str, id: u32, delay: Duration) -> Self {
            self.elements.insert(selector.to_string(), (id, delay));
            self
        }

        fn with_invalid(mut self, selector: &str) -> Self {
            self.invalid.push(selector.to_string());
            self
        }

        fn queried(&self) -> Vec<String> {
            self.queried.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ElementQuery for FakePage {
        type Handle = u32;

        async fn wait_for(&self, selector: &str, _timeout: Duration) -> HealResult<Option<u32>> {
            self.queried.lock().unwrap().push(selector.to_string());
            if self.invalid.iter().any(|s| s == selector) {
                return Err(HealError::Query {
                    selector: selector.to_string(),
                    reason: "invalid selector".into(),
                });
            }
            match self.elements.get(selector) {
                Some((id, delay)) => {
                    tokio::time::sleep(*delay).await;
                    Ok(Some(*id))
                }
                None => Ok(None),
            }
        }
    }

    fn chain(primary: &str, fallbacks: &[&str]) -> SelectorChain {
        SelectorChain::new(primary, fallbacks.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn test_primary_hit_records_nothing() {
        let page = FakePage::default().with("#submit", 1).with("[data-testid=submit]", 2);
        let mut resolver = SelectorResolver::new(page, LearningStore::new("w0"));

        let resolved = resolver
            .resolve_chain(&chain("#submit", &["[data-testid=submit]"]))
            .await
            .unwrap();

        assert_eq!(resolved.handle, 1);
        assert!(!resolved.healed);
        assert_eq!(resolved.attempts, 1);
        assert!(resolver.store().is_empty());
        assert_eq!(resolver.engine().queried(), vec!["#submit"]);
    }

    #[tokio::test]
    async fn test_first_working_fallback_is_learned() {
        let page = FakePage::default().with(".btn-b", 2).with(".btn-c", 3);
        let mut resolver = SelectorResolver::new(page, LearningStore::new("w0"));

        let resolved = resolver
            .resolve_chain(&chain("#old-btn", &[".btn-a", ".btn-b", ".btn-c"]))
            .await
            .unwrap();

        assert_eq!(resolved.handle, 2);
        assert_eq!(resolved.selector, ".btn-b");
        assert!(resolved.healed);
        assert_eq!(resolved.attempts, 3);
        assert_eq!(resolver.store().get("#old-btn"), Some(".btn-b"));
    }

    #[tokio::test]
    async fn test_exhausted_chain_fails_without_learning() {
        let page = FakePage::default();
        let mut resolver = SelectorResolver::new(page, LearningStore::new("w0"));

        let err = resolver
            .resolve_chain(&chain("#gone", &[".also-gone"]))
            .await
            .unwrap_err();

        match err {
            HealError::NoSelectorResolved { primary, attempted } => {
                assert_eq!(primary, "#gone");
                assert_eq!(attempted, vec!["#gone", ".also-gone"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(resolver.into_store().is_empty());
    }

    #[tokio::test]
    async fn test_empty_fallback_chain() {
        let mut resolver = SelectorResolver::new(FakePage::default(), LearningStore::new("w0"));
        assert!(resolver.resolve("#only", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_engine_error_moves_to_next_fallback() {
        let page = FakePage::default().with_invalid("#old::bad").with("#new", 7);
        let mut resolver = SelectorResolver::new(page, LearningStore::new("w0"));

        let resolved = resolver.resolve_chain(&chain("#old::bad", &["#new"])).await.unwrap();
        assert_eq!(resolved.handle, 7);
        assert_eq!(resolver.store().get("#old::bad"), Some("#new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_attempt() {
        let page = FakePage::default()
            .with_delay("#slow", 1, Duration::from_secs(60))
            .with("#fast", 2);
        let mut resolver = SelectorResolver::new(page, LearningStore::new("w0"))
            .with_attempt_timeout(Duration::from_millis(200));

        let resolved = resolver.resolve_chain(&chain("#slow", &["#fast"])).await.unwrap();
        assert_eq!(resolved.handle, 2);
        assert_eq!(resolver.store().get("#slow"), Some("#fast"));
    }

    #[tokio::test]
    async fn test_duplicate_and_self_fallbacks_skipped() {
        let page = FakePage::default().with("#b", 2);
        let mut resolver = SelectorResolver::new(page, LearningStore::new("w0"));

        resolver
            .resolve_chain(&chain("#a", &["#a", "#x", "#x", "#b"]))
            .await
            .unwrap();
        assert_eq!(resolver.engine().queried(), vec!["#a", "#x", "#b"]);
    }
}
