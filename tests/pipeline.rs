//! End-to-end pipeline runs against the in-memory and file backends.

use depgraph::analyzer::MockAnalyzer;
use depgraph::discovery::{DiscoveryError, ManifestDiscovery, StaticDiscovery};
use async_trait::async_trait;
use depgraph::graph::{
    Backend, BackendError, FileBackend, GraphEdge, GraphNode, GraphStore, MemoryBackend, PutError,
    StoreCounts, StoreError,
};
use depgraph::parser::Package;
use depgraph::pipeline::{
    Cancellation, Pipeline, PipelineOptions, Stage, StartupError, UnresolvedPolicy,
};
use depgraph::registry::RegistryLayout;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const HOST: &str = "registry.example";

fn locator(path: &str) -> String {
    format!("https://{}/{}", HOST, path)
}

fn build(
    analyzer: Arc<MockAnalyzer>,
    options: PipelineOptions,
) -> (Arc<MemoryBackend>, GraphStore, Pipeline) {
    let backend = Arc::new(MemoryBackend::new());
    let store = GraphStore::new(backend.clone());
    let pipeline = Pipeline::new(
        store.clone(),
        analyzer,
        RegistryLayout::with_host(HOST),
        options,
    );
    (backend, store, pipeline)
}

#[tokio::test]
async fn test_end_to_end_example() {
    let analyzer = Arc::new(
        MockAnalyzer::new()
            .with_record(&locator("x/foo@1.0.0/mod.ts"), [locator("std@1.0.0/mod.ts")]),
    );
    let (backend, store, pipeline) = build(analyzer.clone(), PipelineOptions::default());

    let discovery = StaticDiscovery::new(vec![
        Package::new("foo").with_version("1.0.0", ["/mod.ts"]),
        Package::new("std").with_version("1.0.0", ["/mod.ts"]),
    ]);
    let report = pipeline.run(discovery, Cancellation::new()).await.unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.error_count(), 0);

    let mut calls = analyzer.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            "https://registry.example/std@1.0.0/mod.ts".to_string(),
            "https://registry.example/x/foo@1.0.0/mod.ts".to_string(),
        ]
    );

    let file = store
        .lookup_by_specifier("x/foo@1.0.0/mod.ts")
        .await
        .unwrap()
        .expect("file node persisted");
    assert!(file.uid.is_some());
    assert!(store.lookup_by_specifier("std@1.0.0/mod.ts").await.unwrap().is_some());
    assert!(store.lookup_by_specifier("x/foo").await.unwrap().is_some());
    assert!(store.lookup_by_specifier("std").await.unwrap().is_some());

    assert_eq!(
        backend.dependencies("x/foo@1.0.0/mod.ts").await,
        vec!["std@1.0.0/mod.ts".to_string()]
    );
    assert_eq!(
        backend.dependencies("x/foo@1.0.0").await,
        vec!["x/foo@1.0.0/mod.ts".to_string()]
    );
}

#[tokio::test]
async fn test_fault_isolation() {
    let broken = locator("x/pkg-2@1.0.0/broken.ts");
    let analyzer = Arc::new(MockAnalyzer::new().failing(&broken));
    let (_, store, pipeline) = build(analyzer, PipelineOptions::default());

    let packages: Vec<Package> = (0..5)
        .map(|i| {
            let files: Vec<&str> = if i == 2 {
                vec!["/broken.ts", "/mod.ts"]
            } else {
                vec!["/mod.ts"]
            };
            Package::new(format!("pkg-{}", i)).with_version("1.0.0", files)
        })
        .collect();

    let report = pipeline
        .run(StaticDiscovery::new(packages), Cancellation::new())
        .await
        .unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.summary.files_analyzed, 5);
    assert_eq!(report.summary.files_skipped, 1);
    assert_eq!(report.errors.count(Stage::Analysis), 1);
    assert_eq!(report.error_count(), 1);

    for i in 0..5 {
        let spec = format!("x/pkg-{}@1.0.0/mod.ts", i);
        assert!(store.lookup_by_specifier(&spec).await.unwrap().is_some(), "{}", spec);
    }
    assert!(store
        .lookup_by_specifier("x/pkg-2@1.0.0/broken.ts")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_error_attribution() {
    let (_, _, pipeline) = build(Arc::new(MockAnalyzer::new()), PipelineOptions::default());

    let discovery_errors = (0..3)
        .map(|i| DiscoveryError::Io {
            path: format!("/registry/page-{}", i).into(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "page fetch timed out"),
        })
        .collect();
    let discovery = StaticDiscovery::new(vec![
        Package::new("good").with_version("1.0.0", ["/mod.ts"]),
        Package::new("no-versions"),
        Package::new("relative").with_version("1.0.0", ["mod.ts"]),
        Package::new("").with_version("1.0.0", ["/mod.ts"]),
    ])
    .with_errors(discovery_errors);

    let report = pipeline.run(discovery, Cancellation::new()).await.unwrap();

    assert_eq!(report.errors.count(Stage::Discovery), 3);
    assert_eq!(report.errors.count(Stage::Enqueue), 3);
    assert_eq!(report.error_count(), 6);
    assert_eq!(report.summary.packages, 1);
    assert_eq!(report.summary.files_analyzed, 1);
}

#[tokio::test]
async fn test_duplicate_packages_processed_once() {
    let analyzer = Arc::new(MockAnalyzer::new());
    let (_, _, pipeline) = build(analyzer.clone(), PipelineOptions::default());

    let oak = Package::new("oak").with_version("12.0.0", ["/mod.ts"]);
    let discovery = StaticDiscovery::new(vec![oak.clone(), oak.clone(), oak]);
    let report = pipeline.run(discovery, Cancellation::new()).await.unwrap();

    assert_eq!(report.summary.packages, 1);
    assert_eq!(analyzer.calls().len(), 1);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let analyzer = Arc::new(
        MockAnalyzer::new().with_record(&locator("x/oak@12.0.0/mod.ts"), [locator("std@0.200.0/http/mod.ts")]),
    );
    let (_, store, pipeline) = build(analyzer, PipelineOptions::default());
    let packages = || vec![Package::new("oak").with_version("12.0.0", ["/mod.ts"])];

    let first = pipeline
        .run(StaticDiscovery::new(packages()), Cancellation::new())
        .await
        .unwrap();
    let uid = store
        .lookup_by_specifier("x/oak@12.0.0/mod.ts")
        .await
        .unwrap()
        .unwrap()
        .uid;
    let counts = store.counts().await.unwrap();

    let second = pipeline
        .run(StaticDiscovery::new(packages()), Cancellation::new())
        .await
        .unwrap();

    assert!(first.summary.nodes_created > 0);
    assert_eq!(second.summary.nodes_created, 0);
    assert_eq!(second.summary.nodes_existing, first.summary.nodes_created);
    assert_eq!(second.summary.edges_created, 0);
    assert_eq!(store.counts().await.unwrap(), counts);

    let node = store.lookup_by_specifier("x/oak@12.0.0/mod.ts").await.unwrap().unwrap();
    assert_eq!(node.uid, uid);
}

#[tokio::test]
async fn test_placeholder_policy_records_failed_files() {
    let broken = locator("x/foo@1.0.0/broken.ts");
    let options = PipelineOptions {
        unresolved: UnresolvedPolicy::Placeholder,
        ..PipelineOptions::default()
    };
    let (backend, store, pipeline) = build(Arc::new(MockAnalyzer::new().failing(&broken)), options);

    let discovery = StaticDiscovery::new(vec![
        Package::new("foo").with_version("1.0.0", ["/mod.ts", "/broken.ts"]),
    ]);
    let report = pipeline.run(discovery, Cancellation::new()).await.unwrap();

    assert_eq!(report.summary.placeholders, 1);
    let node = store
        .lookup_by_specifier("x/foo@1.0.0/broken.ts")
        .await
        .unwrap()
        .unwrap();
    assert!(node.unresolved);
    assert_eq!(
        backend.dependencies("x/foo@1.0.0").await,
        vec!["x/foo@1.0.0/broken.ts".to_string(), "x/foo@1.0.0/mod.ts".to_string()]
    );
}

#[tokio::test]
async fn test_cancel_stops_run() {
    let analyzer = Arc::new(MockAnalyzer::new().with_latency(Duration::from_secs(60)));
    let (_, _, pipeline) = build(analyzer, PipelineOptions::default());

    let discovery = StaticDiscovery::new(
        (0..10)
            .map(|i| Package::new(format!("slow-{}", i)).with_version("1.0.0", ["/mod.ts"]))
            .collect(),
    );

    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(5), pipeline.run(discovery, cancel))
        .await
        .expect("run returns promptly after cancellation")
        .unwrap();
    assert!(report.cancelled);
}

#[tokio::test]
async fn test_missing_analyzer_is_fatal() {
    let analyzer = Arc::new(MockAnalyzer::new().missing());
    let (_, store, pipeline) = build(analyzer.clone(), PipelineOptions::default());

    let discovery = StaticDiscovery::new(vec![Package::new("foo").with_version("1.0.0", ["/mod.ts"])]);
    let err = pipeline.run(discovery, Cancellation::new()).await.unwrap_err();

    assert!(matches!(err, StartupError::AnalyzerMissing));
    assert!(analyzer.calls().is_empty());
    assert_eq!(store.counts().await.unwrap().nodes, 0);
}

#[tokio::test]
async fn test_buffered_queue_and_single_worker() {
    let options = PipelineOptions {
        queue_capacity: 4,
        max_concurrent_packages: 1,
        ..PipelineOptions::default()
    };
    let analyzer = Arc::new(MockAnalyzer::new());
    let (_, _, pipeline) = build(analyzer.clone(), options);

    let discovery = StaticDiscovery::new(
        (0..8)
            .map(|i| Package::new(format!("p{}", i)).with_version("1.0.0", ["/mod.ts", "/cli.ts"]))
            .collect(),
    );
    let report = pipeline.run(discovery, Cancellation::new()).await.unwrap();

    assert_eq!(report.summary.files_analyzed, 16);
    // One package at a time: calls arrive grouped by package, in file order.
    let calls = analyzer.calls();
    for pair in calls.chunks(2) {
        assert!(pair[0].ends_with("/mod.ts"));
        assert!(pair[1].ends_with("/cli.ts"));
    }
}

#[tokio::test]
async fn test_manifest_into_file_store() {
    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("packages.json");
    std::fs::write(
        &manifest,
        r#"[{"name": "foo", "versions": {"1.0.0": ["/mod.ts"]}}, {"name": 42}]"#,
    )
    .unwrap();
    let store_path = dir.path().join("graph").join("store.jsonl");

    {
        let store = GraphStore::new(Arc::new(FileBackend::new(&store_path)));
        let pipeline = Pipeline::new(
            store,
            Arc::new(MockAnalyzer::new()),
            RegistryLayout::with_host(HOST),
            PipelineOptions::default(),
        );
        let report = pipeline
            .run(ManifestDiscovery::new(&manifest), Cancellation::new())
            .await
            .unwrap();
        assert_eq!(report.summary.files_analyzed, 1);
        assert_eq!(report.errors.count(Stage::Discovery), 1);
    }

    let reopened = GraphStore::new(Arc::new(FileBackend::new(&store_path)));
    reopened.init_schema().await.unwrap();
    let node = reopened
        .lookup_by_specifier("x/foo@1.0.0/mod.ts")
        .await
        .unwrap()
        .unwrap();
    assert!(node.uid.is_some());
}

#[tokio::test]
async fn test_lookup_integrity_fault() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_unchecked(GraphNode::resolved("x/dup@1.0.0")).await;
    backend.seed_unchecked(GraphNode::resolved("x/dup@1.0.0")).await;
    let store = GraphStore::new(backend);

    let err = store.lookup_by_specifier("x/dup@1.0.0").await.unwrap_err();
    assert!(matches!(err, StoreError::Integrity { count: 2, .. }));
}

/// Memory backend that refuses to store one specifier.
struct RefusingBackend {
    inner: MemoryBackend,
    refused: String,
}

#[async_trait]
impl Backend for RefusingBackend {
    async fn init_schema(&self) -> Result<(), BackendError> {
        self.inner.init_schema().await
    }

    async fn put_if_absent(&self, node: GraphNode) -> Result<(), PutError> {
        if node.specifier == self.refused {
            return Err(BackendError::Unavailable("write refused".to_string()).into());
        }
        self.inner.put_if_absent(node).await
    }

    async fn put_edge_if_absent(&self, edge: GraphEdge) -> Result<(), PutError> {
        self.inner.put_edge_if_absent(edge).await
    }

    async fn query_by_specifier(&self, specifier: &str) -> Result<Vec<GraphNode>, BackendError> {
        self.inner.query_by_specifier(specifier).await
    }

    async fn counts(&self) -> Result<StoreCounts, BackendError> {
        self.inner.counts().await
    }
}

#[tokio::test]
async fn test_store_fault_is_isolated() {
    let store = GraphStore::new(Arc::new(RefusingBackend {
        inner: MemoryBackend::new(),
        refused: "x/foo@1.0.0/util.ts".to_string(),
    }));
    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(MockAnalyzer::new()),
        RegistryLayout::with_host(HOST),
        PipelineOptions::default(),
    );

    let discovery = StaticDiscovery::new(vec![
        Package::new("foo").with_version("1.0.0", ["/mod.ts", "/util.ts", "/deps.ts"]),
        Package::new("bar").with_version("2.0.0", ["/mod.ts"]),
    ]);
    let report = pipeline.run(discovery, Cancellation::new()).await.unwrap();

    assert!(!report.cancelled);
    assert!(report.errors.count(Stage::Persist) >= 1);
    assert!(report.summary.store_failures >= 1);
    assert_eq!(report.summary.files_analyzed, 4);

    assert!(store.lookup_by_specifier("x/foo@1.0.0/util.ts").await.unwrap().is_none());
    for specifier in ["x/foo@1.0.0/mod.ts", "x/foo@1.0.0/deps.ts", "x/bar@2.0.0/mod.ts"] {
        assert!(
            store.lookup_by_specifier(specifier).await.unwrap().is_some(),
            "{}",
            specifier
        );
    }
}
