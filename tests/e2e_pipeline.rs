//! End-to-end tests for dataset evaluation.
//!
//! Each test exercises: settings → engine → evaluator → report, over the
//! local backend.

use std::io::Write;

use kgqa_signatures::dataset::{debug_records, read_simple_questions, DatasetRecord, FixedAnswers, FixedLinks};
use kgqa_signatures::evaluation::Evaluator;
use kgqa_signatures::graph::LocalGraph;
use kgqa_signatures::{EntityId, GraphService, Settings, SignatureEngine};
use pretty_assertions::assert_eq;

const CITIES: [u64; 5] = [61, 60, 65, 1297, 16555];

fn usa_graph() -> LocalGraph {
    let mut g = LocalGraph::new();
    g.add_edge(30, 61, 36);
    for city in &CITIES[1..] {
        g.add_edge(30, *city, 527);
    }
    for city in CITIES {
        g.add_edge(city, 30, 17);
    }
    g
}

fn debug_links() -> FixedLinks {
    FixedLinks { question: Some(EntityId::item(30)), answers: CITIES.map(EntityId::item).to_vec() }
}

#[tokio::test]
async fn test_debug_dataset_is_answered_correctly() {
    let engine = SignatureEngine::open_local(usa_graph());
    let report = Evaluator::new(&engine).evaluate(debug_records()).await.unwrap();

    assert_eq!(report.evaluated, 2);
    assert_eq!(report.correct, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.precision(), 1.0);
    assert!(report.outcomes.iter().all(|o| o.predicted == EntityId::item(61)));
}

#[tokio::test]
async fn test_incomplete_records_are_skipped_or_filled() {
    let engine = SignatureEngine::open_local(usa_graph());

    let no_ground_truth = DatasetRecord { answer_entity: None, ..debug_records().remove(0) };
    let needs_everything = DatasetRecord {
        answer_entity: Some(EntityId::item(61)),
        ..DatasetRecord::new("What is the capital of the USA?")
    };
    let records = vec![no_ground_truth, needs_everything];

    // without collaborators the second record cannot be completed either
    let bare = Evaluator::new(&engine).evaluate(records.clone()).await.unwrap();
    assert_eq!((bare.evaluated, bare.skipped), (0, 2));
    assert_eq!(bare.precision(), 0.0);

    let helped = Evaluator::new(&engine)
        .with_answer_generator(FixedAnswers(vec!["Washington".into(); 5]))
        .with_entity_linker(debug_links())
        .evaluate(records)
        .await
        .unwrap();
    assert_eq!((helped.evaluated, helped.skipped, helped.correct), (1, 1, 1));
}

#[tokio::test]
async fn test_wrong_answers_lower_precision() {
    let engine = SignatureEngine::open_local(usa_graph());
    let tsv = "Q30\tP36\tQ61\twhat is the capital of the usa\n\
               Q30\tP36\tQ60\twhat city is the capital of america\n";
    let records = read_simple_questions(tsv.as_bytes(), None).unwrap();

    let report = Evaluator::new(&engine)
        .with_answer_generator(FixedAnswers(vec![]))
        .with_entity_linker(debug_links())
        .evaluate(records)
        .await
        .unwrap();

    assert_eq!(report.evaluated, 2);
    assert_eq!(report.correct, 1);
    assert_eq!(report.precision(), 0.5);
    assert!(!report.outcomes[1].correct);
}

#[tokio::test]
async fn test_engine_from_local_settings() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# 30\n61 36\n60 527\n\n# 61\n30 17\n\n# 60\n30 17").unwrap();

    let settings = Settings::from_toml_str(&format!(
        r#"
        [backend]
        kind = "local"
        edge_list = "{}"

        [aggregation]
        workers = 2

        [ranking]
        deadline_secs = 30
        "#,
        file.path().display()
    ))
    .unwrap();

    let engine = SignatureEngine::<dyn GraphService>::from_settings(&settings).await.unwrap();
    assert_eq!(engine.service().name(), "local");

    let answer = engine.answer(&EntityId::item(30), &[EntityId::item(61), EntityId::item(60)]).await.unwrap();
    assert_eq!(answer.entity, EntityId::item(61));
    engine.shutdown().await.unwrap();
}
