//! Workers heal selectors independently; the aggregator merges their artifacts

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use selfheal_e2e::{
    aggregate, HealResult, LearningStore, RunId, SelectorCatalog, SelectorResolver,
};
use selfheal_e2e::resolver::ElementQuery;
use tempfile::TempDir;

/// A rendered page: selector -> element id
struct Page(HashMap<&'static str, u32>);

#[async_trait]
impl ElementQuery for Page {
    type Handle = u32;

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> HealResult<Option<u32>> {
        Ok(self.0.get(selector).copied())
    }
}

const CATALOG: &str = r#"
elements:
  submit:
    primary: '#old-btn'
    fallbacks:
      - '[data-testid=submit]'
      - '[data-testid=alt]'
  search:
    primary: '#search'
    fallbacks:
      - 'input[type=search]'
"#;

async fn run_worker(name: &str, page: Page, dir: &std::path::Path) {
    let catalog = SelectorCatalog::from_yaml(CATALOG).unwrap();
    let mut resolver = SelectorResolver::new(page, LearningStore::new(name))
        .with_attempt_timeout(Duration::from_millis(50));

    for element in ["submit", "search"] {
        resolver
            .resolve_chain(catalog.chain(element).unwrap())
            .await
            .unwrap();
    }
    resolver
        .into_store()
        .write_artifact(dir, &RunId::from_name(name))
        .unwrap();
}

#[tokio::test]
async fn parallel_workers_merge_first_wins() {
    let tmp = TempDir::new().unwrap();
    let results = tmp.path().to_path_buf();

    // run2's page only has the second fallback; run1 saw the first
    let run1 = Page(HashMap::from([("[data-testid=submit]", 1), ("#search", 2)]));
    let run2 = Page(HashMap::from([("[data-testid=alt]", 1), ("input[type=search]", 2)]));

    tokio::join!(
        run_worker("run2", run2, &results),
        run_worker("run1", run1, &results),
    );

    let aggregation = aggregate(&results, ".learnings.json").unwrap();
    assert_eq!(aggregation.artifacts_loaded.len(), 2);
    assert_eq!(aggregation.count(), 2);
    assert_eq!(aggregation.learnings.get("#old-btn"), Some("[data-testid=submit]"));
    assert_eq!(aggregation.learnings.get("#search"), Some("input[type=search]"));
    assert_eq!(aggregation.conflicts.len(), 1);
    assert_eq!(aggregation.conflicts[0].dropped.source, "run2.learnings.json");
}

#[tokio::test]
async fn healthy_run_writes_empty_artifact() {
    let tmp = TempDir::new().unwrap();
    let page = Page(HashMap::from([("#old-btn", 1), ("#search", 2)]));
    run_worker("healthy", page, tmp.path()).await;

    let aggregation = aggregate(tmp.path(), ".learnings.json").unwrap();
    assert_eq!(aggregation.artifacts_loaded.len(), 1);
    assert_eq!(aggregation.count(), 0);
}
