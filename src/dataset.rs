//! Question datasets and the collaborators that fill their gaps.
//!
//! Readers return fully materialized records. Model predictions come from a
//! separate JSON-lines file whose lines pair positionally with dataset rows;
//! rows past its end get no predictions.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::EntityId;
use crate::{Error, Result};

// ============================================================================
// Records
// ============================================================================

/// One question with whatever the source provides about it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub question: String,
    pub question_entity: Option<EntityId>,
    /// Ground truth.
    pub answer_entity: Option<EntityId>,
    /// Surface forms proposed by the answer generator.
    pub predicted_answers: Option<Vec<String>>,
    /// Linked ids of `predicted_answers`; these are the ranking candidates.
    pub predicted_answer_entities: Option<Vec<EntityId>>,
    pub question_to_answer_relation: Option<EntityId>,
    pub answer_to_question_relation: Option<EntityId>,
}

impl DatasetRecord {
    pub fn new(question: impl Into<String>) -> Self {
        Self { question: question.into(), ..Self::default() }
    }

    fn with_predictions(mut self, prediction: Option<&LlmResult>) -> Self {
        if let Some(p) = prediction {
            self.predicted_answers = Some(p.answers.clone());
            self.predicted_answer_entities = Some(p.answer_ids.clone());
        }
        self
    }
}

/// Two copies of "What is the capital of the USA?" with five US cities as
/// candidates. Handy for smoke-testing a backend.
pub fn debug_records() -> Vec<DatasetRecord> {
    let record = DatasetRecord {
        question: "What is the capital of the USA?".into(),
        question_entity: Some(EntityId::item(30)),
        answer_entity: Some(EntityId::item(61)),
        predicted_answers: Some(
            ["Washington", "New York", "Los-Angeles", "Chicago", "Houston"]
                .map(String::from)
                .to_vec(),
        ),
        predicted_answer_entities: Some(
            [61, 60, 65, 1297, 16555].map(EntityId::item).to_vec(),
        ),
        question_to_answer_relation: Some(EntityId::property(36)),
        answer_to_question_relation: None,
    };
    vec![record.clone(), record]
}

// ============================================================================
// Model predictions
// ============================================================================

/// One line of a predictions file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LlmResult {
    pub answers: Vec<String>,
    pub answer_ids: Vec<EntityId>,
}

#[derive(Deserialize)]
struct LlmLine {
    answer_llm: Vec<String>,
    answer_ids: Vec<serde_json::Value>,
}

/// Parse `{"answer_llm": [...], "answer_ids": [...]}` lines. Ids that do not
/// parse (missing links come through as `null` or free text) are dropped.
pub fn read_llm_results<R: BufRead>(reader: R) -> Result<Vec<LlmResult>> {
    let mut results = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: LlmLine = serde_json::from_str(&line)
            .map_err(|e| Error::Dataset(format!("predictions line {}: {e}", n + 1)))?;
        let answer_ids = parsed
            .answer_ids
            .iter()
            .filter_map(|v| {
                let id = v.as_str().and_then(|s| s.parse().ok());
                if id.is_none() {
                    debug!(line = n + 1, value = %v, "Dropping unlinked answer id");
                }
                id
            })
            .collect();
        results.push(LlmResult { answers: parsed.answer_llm, answer_ids });
    }
    Ok(results)
}

pub fn load_llm_results(path: impl AsRef<Path>) -> Result<Vec<LlmResult>> {
    read_llm_results(BufReader::new(open(path.as_ref())?))
}

// ============================================================================
// SimpleQuestions (Wikidata)
// ============================================================================

/// Tab-separated `subject relation object question` rows.
///
/// A `P..` relation points from question to answer; `R..` is the reverse
/// relation and is stored as `P..` in `answer_to_question_relation`.
pub fn read_simple_questions<R: BufRead>(
    reader: R,
    predictions: Option<&[LlmResult]>,
) -> Result<Vec<DatasetRecord>> {
    let mut records = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let [subject, relation, object, question] = fields[..] else {
            return Err(Error::Dataset(format!(
                "line {}: expected 4 tab-separated fields, got {}",
                n + 1,
                fields.len()
            )));
        };

        let (forward, backward) = match relation.split_at_checked(1) {
            Some(("P", _)) => (Some(parse_id(relation, n)?), None),
            Some(("R", number)) => (None, Some(parse_id(&format!("P{number}"), n)?)),
            _ => (None, None),
        };

        let record = DatasetRecord {
            question: question.to_string(),
            question_entity: Some(parse_id(subject, n)?),
            answer_entity: Some(parse_id(object, n)?),
            question_to_answer_relation: forward,
            answer_to_question_relation: backward,
            ..DatasetRecord::default()
        };
        records.push(record.with_predictions(prediction_at(predictions, records.len())));
    }
    Ok(records)
}

pub fn load_simple_questions(path: impl AsRef<Path>, predictions: Option<&[LlmResult]>) -> Result<Vec<DatasetRecord>> {
    let records = read_simple_questions(BufReader::new(open(path.as_ref())?), predictions)?;
    info!(path = %path.as_ref().display(), records = records.len(), "Loaded SimpleQuestions");
    Ok(records)
}

// ============================================================================
// Mintaka
// ============================================================================

#[derive(Deserialize)]
struct MintakaRow {
    question: String,
    #[serde(rename = "questionEntity", default)]
    question_entity: Vec<MintakaEntity>,
    answer: MintakaAnswer,
}

#[derive(Deserialize)]
struct MintakaAnswer {
    #[serde(rename = "answerType")]
    answer_type: String,
    /// Entity objects for entity answers; numbers, strings or null otherwise.
    #[serde(default)]
    answer: serde_json::Value,
}

#[derive(Deserialize)]
struct MintakaEntity {
    name: serde_json::Value,
}

impl MintakaEntity {
    fn id(&self) -> Option<EntityId> {
        self.name.as_str().and_then(|s| s.parse().ok())
    }
}

impl MintakaAnswer {
    fn first_id(&self) -> Option<EntityId> {
        self.answer.get(0)?.get("name")?.as_str()?.parse().ok()
    }
}

/// A Mintaka JSON array. Only entity-typed answers are kept; the first
/// question entity and the first answer are used.
///
/// Predictions pair with every row of the file, including the ones dropped
/// for their answer type.
pub fn read_mintaka<R: Read>(reader: R, predictions: Option<&[LlmResult]>) -> Result<Vec<DatasetRecord>> {
    let rows: Vec<MintakaRow> =
        serde_json::from_reader(reader).map_err(|e| Error::Dataset(format!("mintaka: {e}")))?;

    let records = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.answer.answer_type == "entity")
        .map(|(position, row)| {
            DatasetRecord {
                question: row.question.clone(),
                question_entity: row.question_entity.first().and_then(MintakaEntity::id),
                answer_entity: row.answer.first_id(),
                ..DatasetRecord::default()
            }
            .with_predictions(prediction_at(predictions, position))
        })
        .collect();
    Ok(records)
}

pub fn load_mintaka(path: impl AsRef<Path>, predictions: Option<&[LlmResult]>) -> Result<Vec<DatasetRecord>> {
    let records = read_mintaka(BufReader::new(open(path.as_ref())?), predictions)?;
    info!(path = %path.as_ref().display(), records = records.len(), "Loaded Mintaka");
    Ok(records)
}

// ============================================================================
// MKQA
// ============================================================================

#[derive(Deserialize)]
struct MkqaRow {
    query: String,
    answers: MkqaAnswers,
}

#[derive(Deserialize)]
struct MkqaAnswers {
    #[serde(default)]
    en: Vec<MkqaAnswer>,
}

#[derive(Deserialize)]
struct MkqaAnswer {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    entity: Option<String>,
}

/// MKQA JSON lines. Only rows whose first English answer is an entity are
/// kept. The source names no question entity, so that is left to an
/// [`EntityLinker`].
///
/// Predictions pair with every line, including the dropped ones.
pub fn read_mkqa<R: BufRead>(reader: R, predictions: Option<&[LlmResult]>) -> Result<Vec<DatasetRecord>> {
    let mut records = Vec::new();
    let mut position = 0;
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: MkqaRow = serde_json::from_str(&line)
            .map_err(|e| Error::Dataset(format!("mkqa line {}: {e}", n + 1)))?;
        let prediction = prediction_at(predictions, position);
        position += 1;

        let Some(first) = row.answers.en.first().filter(|a| a.kind == "entity") else {
            continue;
        };
        let record = DatasetRecord {
            question: row.query,
            answer_entity: first.entity.as_deref().and_then(|id| id.parse().ok()),
            ..DatasetRecord::default()
        };
        records.push(record.with_predictions(prediction));
    }
    Ok(records)
}

pub fn load_mkqa(path: impl AsRef<Path>, predictions: Option<&[LlmResult]>) -> Result<Vec<DatasetRecord>> {
    let records = read_mkqa(BufReader::new(open(path.as_ref())?), predictions)?;
    info!(path = %path.as_ref().display(), records = records.len(), "Loaded MKQA");
    Ok(records)
}

// ============================================================================
// Collaborators
// ============================================================================

/// Proposes answer surface forms for a question.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str) -> Result<Vec<String>>;
}

/// Maps text to graph entities.
#[async_trait]
pub trait EntityLinker: Send + Sync {
    /// The entity a question is about, if one can be found.
    async fn link_question(&self, question: &str) -> Result<Option<EntityId>>;

    /// One id per answer that could be linked.
    async fn link_answers(&self, answers: &[String]) -> Result<Vec<EntityId>>;
}

/// Always proposes the same answers.
#[derive(Debug, Clone, Default)]
pub struct FixedAnswers(pub Vec<String>);

#[async_trait]
impl AnswerGenerator for FixedAnswers {
    async fn generate(&self, _question: &str) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Always links to the same entities.
#[derive(Debug, Clone, Default)]
pub struct FixedLinks {
    pub question: Option<EntityId>,
    pub answers: Vec<EntityId>,
}

#[async_trait]
impl EntityLinker for FixedLinks {
    async fn link_question(&self, _question: &str) -> Result<Option<EntityId>> {
        Ok(self.question)
    }

    async fn link_answers(&self, _answers: &[String]) -> Result<Vec<EntityId>> {
        Ok(self.answers.clone())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::Dataset(format!("cannot open {}: {e}", path.display())))
}

fn parse_id(raw: &str, line: usize) -> Result<EntityId> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Dataset(format!("line {}: invalid entity id {raw:?}", line + 1)))
}

fn prediction_at(predictions: Option<&[LlmResult]>, position: usize) -> Option<&LlmResult> {
    predictions.and_then(|p| p.get(position))
}
