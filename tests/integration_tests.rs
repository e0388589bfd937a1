//! Integration tests for Lookup Master
//!
//! These tests drive the public [`Aggregator`] API end to end with scripted
//! adapters and a canned HTTP transport.

use lookup_master::models::{fields, Outcome, QueryKinds};
use lookup_master::sources::{MockSource, SourceAdapter, SourceErrorKind, StaticTransport};
use lookup_master::utils::{AcquireMode, HttpResponse, RateLimiter};
use lookup_master::{
    AggregateError, Aggregator, Config, ExecutionMode, FallbackPolicy, PolicyOverride, Query,
    QueryKind, SourceRegistry,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn registry(sources: &[&Arc<MockSource>]) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    for source in sources {
        let adapter: Arc<dyn SourceAdapter> = Arc::clone(*source) as Arc<dyn SourceAdapter>;
        registry.register_unlimited(adapter).unwrap();
    }
    registry
}

fn policy(kind: QueryKind, mode: ExecutionMode, order: &[&str]) -> FallbackPolicy {
    FallbackPolicy::default().with_kind(kind, mode, order).unwrap()
}

fn name_query() -> Query {
    Query::new("aspirin", QueryKind::Name)
}

#[tokio::test]
async fn test_sequential_stops_at_first_success() {
    let a = Arc::new(MockSource::new("a", QueryKinds::NAME).with_text(fields::IUPAC_NAME, "A"));
    let b = Arc::new(MockSource::new("b", QueryKinds::NAME).with_text(fields::IUPAC_NAME, "B"));
    let aggregator = Aggregator::new(
        registry(&[&a, &b]),
        policy(QueryKind::Name, ExecutionMode::Sequential, &["a", "b"]),
    );

    let result = assert_ok!(aggregator.lookup(name_query(), Duration::from_secs(1)).await);

    assert_eq!(result.record.text(fields::IUPAC_NAME), Some("A"));
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0);
}

#[tokio::test]
async fn test_sequential_falls_back_after_failure() {
    let a = Arc::new(MockSource::new("a", QueryKinds::NAME).failing(SourceErrorKind::Unreachable));
    let b = Arc::new(MockSource::new("b", QueryKinds::NAME).with_text(fields::SMILES, "CCO"));
    let aggregator = Aggregator::new(
        registry(&[&a, &b]),
        policy(QueryKind::Name, ExecutionMode::Sequential, &["a", "b"]),
    );

    let result = assert_ok!(aggregator.lookup(name_query(), Duration::from_secs(1)).await);

    assert_eq!(result.record.text(fields::SMILES), Some("CCO"));
    assert_eq!(result.record.sources(), &["b".to_string()]);
    let order: Vec<_> = result.diagnostics.iter().map(|d| d.source.as_str()).collect();
    assert_eq!(order, vec!["a", "b"]);
    assert_eq!(
        result.diagnostics.get("a").and_then(|d| d.error_kind()),
        Some(SourceErrorKind::Unreachable)
    );
}

#[tokio::test]
async fn test_parallel_failure_does_not_hide_success() {
    let a = Arc::new(
        MockSource::new("a", QueryKinds::ABSTRACT_TEXT).failing(SourceErrorKind::Malformed),
    );
    let b = Arc::new(
        MockSource::new("b", QueryKinds::ABSTRACT_TEXT).with_text(fields::TITLE, "Deep learning"),
    );
    let aggregator = Aggregator::new(
        registry(&[&a, &b]),
        policy(QueryKind::AbstractText, ExecutionMode::Parallel, &["a", "b"]),
    );

    let result = assert_ok!(
        aggregator
            .lookup(
                Query::new("convolutional networks", QueryKind::AbstractText),
                Duration::from_secs(1)
            )
            .await
    );

    assert_eq!(result.mode, ExecutionMode::Parallel);
    assert_eq!(result.record.text(fields::TITLE), Some("Deep learning"));
    assert_eq!(result.diagnostics.len(), 2);
    assert_eq!(result.diagnostics.successes().count(), 1);
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
}

#[tokio::test]
async fn test_all_sources_failing_reports_each_attempt() {
    let a = Arc::new(MockSource::new("a", QueryKinds::NAME).failing(SourceErrorKind::NotFound));
    let b = Arc::new(MockSource::new("b", QueryKinds::NAME).failing(SourceErrorKind::RateLimited));
    let c = Arc::new(MockSource::new("c", QueryKinds::NAME).failing(SourceErrorKind::Malformed));
    let aggregator = Aggregator::new(
        registry(&[&a, &b, &c]),
        policy(QueryKind::Name, ExecutionMode::Parallel, &["a", "b", "c"]),
    );

    let err = assert_err!(aggregator.lookup(name_query(), Duration::from_secs(1)).await);

    match &err {
        AggregateError::NoResult {
            diagnostics,
            record,
        } => {
            assert_eq!(diagnostics.len(), 3);
            assert_eq!(diagnostics.failures().count(), 3);
            assert!(record.is_empty());
        }
        other => panic!("expected NoResult, got {:?}", other),
    }
}

#[tokio::test]
async fn test_parallel_hanging_source_is_cut_off_at_deadline() {
    let slow = Arc::new(MockSource::new("slow", QueryKinds::ABSTRACT_TEXT).hanging());
    let fast = Arc::new(
        MockSource::new("fast", QueryKinds::ABSTRACT_TEXT).with_text(fields::TITLE, "Found"),
    );
    let aggregator = Aggregator::new(
        registry(&[&slow, &fast]),
        policy(
            QueryKind::AbstractText,
            ExecutionMode::Parallel,
            &["slow", "fast"],
        ),
    );

    let started = Instant::now();
    let result = assert_ok!(
        aggregator
            .lookup(
                Query::new("protein folding", QueryKind::AbstractText),
                Duration::from_millis(200)
            )
            .await
    );

    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(result.record.text(fields::TITLE), Some("Found"));
    assert_eq!(
        result.diagnostics.get("slow").and_then(|d| d.error_kind()),
        Some(SourceErrorKind::Timeout)
    );
}

#[tokio::test]
async fn test_deadline_exceeded_when_nothing_answers() {
    let a = Arc::new(MockSource::new("a", QueryKinds::NAME).hanging());
    let b = Arc::new(MockSource::new("b", QueryKinds::NAME).hanging());
    let aggregator = Aggregator::new(
        registry(&[&a, &b]),
        policy(QueryKind::Name, ExecutionMode::Sequential, &["a", "b"]),
    );

    let started = Instant::now();
    let err = assert_err!(aggregator.lookup(name_query(), Duration::from_millis(150)).await);

    assert!(started.elapsed() < Duration::from_millis(600));
    assert!(matches!(err, AggregateError::DeadlineExceeded { .. }));
    let diagnostics = err.diagnostics().unwrap();
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics
        .iter()
        .all(|d| d.error_kind() == Some(SourceErrorKind::Timeout)));
}

#[tokio::test]
async fn test_no_capable_source_is_invalid_query() {
    let a = Arc::new(MockSource::new("a", QueryKinds::NAME));
    let aggregator = Aggregator::new(registry(&[&a]), FallbackPolicy::default());

    let err = assert_err!(
        aggregator
            .lookup(
                Query::new("10.1038/nature14539", QueryKind::Identifier),
                Duration::from_secs(1)
            )
            .await
    );

    assert!(matches!(err, AggregateError::InvalidQuery { .. }));
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn test_only_override_restricts_sources() {
    let a = Arc::new(MockSource::new("a", QueryKinds::NAME).with_text(fields::IUPAC_NAME, "A"));
    let b = Arc::new(MockSource::new("b", QueryKinds::NAME).with_text(fields::IUPAC_NAME, "B"));
    let aggregator = Aggregator::new(
        registry(&[&a, &b]),
        policy(QueryKind::Name, ExecutionMode::Sequential, &["a", "b"]),
    );

    let result = assert_ok!(
        aggregator
            .lookup_with(
                name_query(),
                Duration::from_secs(1),
                &PolicyOverride::Only(vec!["b".to_string()])
            )
            .await
    );

    assert_eq!(result.record.text(fields::IUPAC_NAME), Some("B"));
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn test_prefer_override_reorders_sources() {
    let a = Arc::new(MockSource::new("a", QueryKinds::NAME).with_text(fields::IUPAC_NAME, "A"));
    let b = Arc::new(MockSource::new("b", QueryKinds::NAME).with_text(fields::IUPAC_NAME, "B"));
    let aggregator = Aggregator::new(
        registry(&[&a, &b]),
        policy(QueryKind::Name, ExecutionMode::Sequential, &["a", "b"]),
    );

    let result = assert_ok!(
        aggregator
            .lookup_with(
                name_query(),
                Duration::from_secs(1),
                &PolicyOverride::Prefer(vec!["b".to_string()])
            )
            .await
    );

    assert_eq!(result.record.text(fields::IUPAC_NAME), Some("B"));
    assert_eq!(b.calls(), 1);
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn test_throttled_source_falls_back_to_next() {
    let a = Arc::new(MockSource::new("a", QueryKinds::NAME).with_text(fields::IUPAC_NAME, "A"));
    let b = Arc::new(MockSource::new("b", QueryKinds::NAME).with_text(fields::IUPAC_NAME, "B"));

    let mut registry = SourceRegistry::new();
    registry
        .register(
            Arc::clone(&a) as Arc<dyn SourceAdapter>,
            RateLimiter::new("a", 1, 0.01, AcquireMode::FailFast).unwrap(),
        )
        .unwrap();
    registry
        .register_unlimited(Arc::clone(&b) as Arc<dyn SourceAdapter>)
        .unwrap();
    let aggregator = Aggregator::new(
        registry,
        policy(QueryKind::Name, ExecutionMode::Sequential, &["a", "b"]),
    );

    let first = assert_ok!(aggregator.lookup(name_query(), Duration::from_secs(1)).await);
    assert_eq!(first.record.text(fields::IUPAC_NAME), Some("A"));

    let second = assert_ok!(aggregator.lookup(name_query(), Duration::from_secs(1)).await);
    assert_eq!(second.record.text(fields::IUPAC_NAME), Some("B"));
    assert_eq!(
        second.diagnostics.get("a").and_then(|d| d.error_kind()),
        Some(SourceErrorKind::RateLimited)
    );
    // The throttled call never reached the adapter
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
}

#[tokio::test]
async fn test_parallel_merge_prefers_higher_confidence() {
    let low = Arc::new(
        MockSource::new("low", QueryKinds::ABSTRACT_TEXT)
            .with_confidence(1)
            .with_text(fields::TITLE, "deep learning")
            .with_text(fields::VENUE, "Nature"),
    );
    let high = Arc::new(
        MockSource::new("high", QueryKinds::ABSTRACT_TEXT)
            .with_confidence(5)
            .with_delay(Duration::from_millis(30))
            .with_text(fields::TITLE, "Deep Learning"),
    );
    let aggregator = Aggregator::new(
        registry(&[&low, &high]),
        policy(
            QueryKind::AbstractText,
            ExecutionMode::Parallel,
            &["low", "high"],
        ),
    );

    let result = assert_ok!(
        aggregator
            .lookup(
                Query::new("deep learning", QueryKind::AbstractText),
                Duration::from_secs(1)
            )
            .await
    );

    assert_eq!(result.record.text(fields::TITLE), Some("Deep Learning"));
    assert_eq!(result.record.source_of(fields::TITLE), Some("high"));
    assert_eq!(result.record.text(fields::VENUE), Some("Nature"));
}

#[tokio::test]
async fn test_default_config_over_static_transport() {
    let transport = StaticTransport::new()
        .route(
            "/compound/name/aspirin/JSON",
            HttpResponse::new(503, "Service Unavailable"),
        )
        .json(
            "/compound/name/aspirin/cids/JSON",
            json!({"IdentifierList": {"CID": [2244]}}),
        )
        .json(
            "/compound/cid/2244/property/",
            json!({"PropertyTable": {"Properties": [{
                "CID": 2244,
                "MolecularFormula": "C9H8O4",
                "MolecularWeight": "180.16",
                "CanonicalSMILES": "CC(=O)OC1=CC=CC=C1C(=O)O",
                "InChIKey": "BSYNRYMUTXBXSQ-UHFFFAOYSA-N",
                "IUPACName": "2-acetyloxybenzoic acid"
            }]}}),
        )
        .json(
            "/compound/cid/2244/synonyms/JSON",
            json!({"InformationList": {"Information": [{
                "CID": 2244,
                "Synonym": ["aspirin", "Acetylsalicylic acid", "ASPIRIN"]
            }]}}),
        );
    let transport = Arc::new(transport);
    let aggregator = assert_ok!(Aggregator::with_transport(
        &Config::default(),
        Arc::clone(&transport) as Arc<dyn lookup_master::utils::Transport>
    ));

    let result = assert_ok!(aggregator.lookup(name_query(), Duration::from_secs(2)).await);

    assert_eq!(result.record.text(fields::MOLECULAR_FORMULA), Some("C9H8O4"));
    assert_eq!(result.record.text(fields::CID), Some("2244"));
    assert_eq!(
        result.record.list(fields::SYNONYMS),
        Some(&["aspirin".to_string(), "Acetylsalicylic acid".to_string()][..])
    );

    let pubchem = result.diagnostics.get("pubchem").unwrap();
    assert_eq!(pubchem.error_kind(), Some(SourceErrorKind::Unreachable));
    let fallback = result.diagnostics.get("pubchem_rest").unwrap();
    assert!(matches!(fallback.outcome, Outcome::Success { .. }));
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn test_paperlist_search_and_detail_share_one_lookup() {
    let transport = Arc::new(
        StaticTransport::new()
            .json(
                "papelist.app/api/paper",
                json!({"count": 1, "page": [{
                    "id": 77,
                    "title": "Highly accurate protein structure prediction with AlphaFold",
                    "authors": "John Jumper, Richard Evans",
                    "year": 2021,
                    "venue": "Nature"
                }]}),
            )
            .json(
                "papelist.app/api/detail",
                json!({"abstr": "Proteins are essential to life...", "id_doi": "10.1038/s41586-021-03819-2"}),
            ),
    );
    let aggregator = assert_ok!(Aggregator::with_transport(
        &Config::default(),
        Arc::clone(&transport) as Arc<dyn lookup_master::utils::Transport>
    ));

    let result = assert_ok!(
        aggregator
            .lookup_with(
                Query::new("protein structure prediction", QueryKind::AbstractText),
                Duration::from_secs(2),
                &PolicyOverride::Only(vec!["paperlist".to_string()])
            )
            .await
    );

    assert_eq!(result.mode, ExecutionMode::Parallel);
    assert_eq!(result.record.text(fields::DOI), Some("10.1038/s41586-021-03819-2"));
    assert_eq!(result.record.text(fields::ABSTRACT), Some("Proteins are essential to life..."));
    assert_eq!(result.record.source_of(fields::TITLE), Some("paperlist"));
    assert_eq!(transport.calls(), 2);
}
