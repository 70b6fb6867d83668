//! End-to-end tests for the ingestion and retrieval engine, using the
//! offline hashing encoders so no model download is needed.

use std::path::Path;
use std::sync::Arc;

use docrag::ingestion::TextChunker;
use docrag::{EmbeddingFuser, ErrorKind, RagConfig, RagEngine, SourceSummary, VectorStore};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

const PARIS: &str = "Paris is the capital of France.";
const BANANAS: &str = "Bananas are a yellow fruit rich in potassium.";

fn config(dir: &Path) -> RagConfig {
    RagConfig::with_persist_dir(dir)
}

fn engine_with(config: RagConfig) -> RagEngine {
    let fuser = Arc::new(EmbeddingFuser::hashing(&config.embeddings));
    RagEngine::with_fuser(config, fuser).unwrap()
}

fn engine(dir: &Path) -> RagEngine {
    engine_with(config(dir))
}

/// Minimal PDF with one text line per page
fn text_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });

    let kids: Vec<Object> = pages
        .iter()
        .map(|text| {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            });
            Object::Reference(page_id)
        })
        .collect();

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! { "Type" => "Pages", "Kids" => kids, "Count" => count }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

#[tokio::test]
async fn test_chunk_count_matches_chunker() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.chunking.chunk_size = 80;
    config.chunking.chunk_overlap = 20;
    let engine = engine_with(config);

    let text = "The first paragraph talks about rivers and lakes.\n\n\
                The second paragraph covers mountains, valleys and the glaciers that shaped them.\n\n\
                A short closing line.";
    let report = engine.ingest(text.as_bytes().to_vec(), "geo.txt").await.unwrap();

    let expected = TextChunker::new(80, 20).split(text).len();
    assert!(expected > 1);
    assert_eq!(report.chunks_ingested, expected);
    assert_eq!(report.pages, 1);

    let sources = engine.list_ingested_sources().await;
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].chunk_count, expected);
}

#[tokio::test]
async fn test_every_vector_has_fused_width() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    assert_eq!(engine.dimensions(), 384 + 768);

    engine.ingest(PARIS.as_bytes().to_vec(), "paris.txt").await.unwrap();

    let store = VectorStore::open(engine.persist_location());
    assert_eq!(store.db().dimensions().unwrap(), Some(384 + 768));
    store
        .db()
        .scan_embeddings(|_, v| assert_eq!(v.len(), 384 + 768))
        .unwrap();
}

#[tokio::test]
async fn test_query_returns_at_most_k_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    engine.ingest(PARIS.as_bytes().to_vec(), "paris.txt").await.unwrap();
    engine.ingest(BANANAS.as_bytes().to_vec(), "bananas.txt").await.unwrap();
    engine
        .ingest(b"Rivers flow into the sea.".to_vec(), "rivers.txt")
        .await
        .unwrap();

    for k in [1, 2, 3, 10] {
        let hits = engine.query("capital of France", k).await;
        assert_eq!(hits.len(), k.min(3));
        assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
    }
    assert!(engine.query("capital of France", 0).await.is_empty());
}

#[tokio::test]
async fn test_nearest_chunk_answers_question() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    engine.ingest(PARIS.as_bytes().to_vec(), "paris.txt").await.unwrap();
    engine.ingest(BANANAS.as_bytes().to_vec(), "bananas.txt").await.unwrap();

    let hits = engine.query("What is the capital of France?", 1).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source(), "paris.txt");
    assert_eq!(hits[0].page(), 1);
    assert_eq!(hits[0].text, PARIS);
}

#[tokio::test]
async fn test_single_fact_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    engine
        .ingest(b"The capital of France is Paris.".to_vec(), "france.txt")
        .await
        .unwrap();

    let hits = engine.query("What is the capital of France?", 1).await;
    assert_eq!(hits.len(), 1);
    assert!(hits[0].text.contains("Paris"));
    assert_eq!(hits[0].source(), "france.txt");
}

#[tokio::test]
async fn test_reads_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    engine.ingest(PARIS.as_bytes().to_vec(), "paris.txt").await.unwrap();
    engine.ingest(BANANAS.as_bytes().to_vec(), "bananas.txt").await.unwrap();

    let first = engine.query("yellow fruit", 2).await;
    let second = engine.query("yellow fruit", 2).await;
    assert_eq!(first, second);

    let context = engine.get_context_for_question("yellow fruit", 2).await;
    assert_eq!(context, engine.get_context_for_question("yellow fruit", 2).await);
    assert!(context.starts_with("--- Source: bananas.txt | Chunk 1 | Score: "));
    assert!(context.contains("\n\n--- Source: paris.txt | Chunk 2 | Score: "));

    assert_eq!(
        engine.list_ingested_sources().await,
        engine.list_ingested_sources().await
    );
}

#[tokio::test]
async fn test_reingest_appends() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let bytes = PARIS.as_bytes().to_vec();
    assert!(!engine.is_ingested("paris.txt", &bytes).await.unwrap());

    engine.ingest(bytes.clone(), "paris.txt").await.unwrap();
    assert!(engine.is_ingested("paris.txt", &bytes).await.unwrap());
    engine.ingest(bytes.clone(), "paris.txt").await.unwrap();

    let sources = engine.list_ingested_sources().await;
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].chunk_count, 2);

    let hits = engine.query("capital of France", 2).await;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].score, hits[1].score);
}

#[tokio::test]
async fn test_empty_store_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    assert!(engine.query("anything", 4).await.is_empty());
    assert_eq!(engine.get_context_for_question("anything", 4).await, "");
    assert!(engine.list_ingested_sources().await.is_empty());
    assert!(!engine.persist_location().exists());
}

#[tokio::test]
async fn test_pdf_pages_are_attributed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let pdf = text_pdf(&["Volcanoes erupt molten rock", "", "Glaciers carve valleys slowly"]);
    let report = engine.ingest(pdf, "earth.pdf").await.unwrap();
    assert_eq!(report.pages, 3);
    assert_eq!(report.chunks_ingested, 3);

    let hits = engine.query("glaciers carve valleys", 1).await;
    assert_eq!(hits[0].source(), "earth.pdf");
    assert_eq!(hits[0].page(), 3);
}

#[tokio::test]
async fn test_collection_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = engine(dir.path());
        engine.ingest(PARIS.as_bytes().to_vec(), "paris.txt").await.unwrap();
    }

    let reopened = engine(dir.path());
    let sources = reopened.list_ingested_sources().await;
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].name, "paris.txt");
    assert_eq!(reopened.query("capital", 1).await[0].text, PARIS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingests_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    let long: String = (0..200).map(|i| format!("Sentence number {} about rivers. ", i)).collect();
    let (a, b, c) = tokio::join!(
        engine.ingest(PARIS.as_bytes().to_vec(), "paris.txt"),
        engine.ingest(long.into_bytes(), "rivers.txt"),
        engine.ingest(BANANAS.as_bytes().to_vec(), "bananas.txt"),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert!(b.chunks_ingested > 1);

    let mut expected = vec![
        SourceSummary { name: a.filename, chunk_count: a.chunks_ingested },
        SourceSummary { name: b.filename, chunk_count: b.chunks_ingested },
        SourceSummary { name: c.filename, chunk_count: c.chunks_ingested },
    ];
    expected.sort_by(|x, y| x.name.cmp(&y.name));
    assert_eq!(engine.list_ingested_sources().await, expected);
}

#[tokio::test]
async fn test_dated_filenames_are_separate_sources() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    engine
        .ingest(b"Budget approved for the bridge.".to_vec(), "minutes__2023.txt")
        .await
        .unwrap();
    engine
        .ingest(b"Bridge construction started.".to_vec(), "minutes__2024.txt")
        .await
        .unwrap();

    let names: Vec<_> = engine
        .list_ingested_sources()
        .await
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["minutes__2023.txt", "minutes__2024.txt"]);

    let hits = engine.query("budget approved", 1).await;
    assert_eq!(hits[0].source(), "minutes__2023.txt");

    assert_eq!(engine.purge_source("minutes__2023.txt").await.unwrap(), 1);
    let sources = engine.list_ingested_sources().await;
    assert_eq!(
        sources,
        vec![SourceSummary { name: "minutes__2024.txt".to_string(), chunk_count: 1 }]
    );
}

#[tokio::test]
async fn test_failed_ingest_leaves_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    engine.ingest(PARIS.as_bytes().to_vec(), "paris.txt").await.unwrap();

    let err = engine.ingest(b"cells".to_vec(), "table.xlsx").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Extraction);

    let err = engine.ingest(b"%PDF-1.5 truncated".to_vec(), "bad.pdf").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Extraction);

    let sources = engine.list_ingested_sources().await;
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].chunk_count, 1);
}

#[tokio::test]
async fn test_purge_then_query() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());

    engine.ingest(PARIS.as_bytes().to_vec(), "paris.txt").await.unwrap();
    engine.ingest(BANANAS.as_bytes().to_vec(), "bananas.txt").await.unwrap();

    assert_eq!(engine.purge_source("paris.txt").await.unwrap(), 1);
    assert_eq!(engine.purge_source("paris.txt").await.unwrap(), 0);

    let hits = engine.query("capital of France", 4).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source(), "bananas.txt");
}
