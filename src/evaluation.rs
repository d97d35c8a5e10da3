//! Run a dataset through the engine and score it.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::{AnswerGenerator, DatasetRecord, EntityLinker};
use crate::model::EntityId;
use crate::service::GraphService;
use crate::{Result, SignatureEngine};

/// What happened to one evaluated record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub question: String,
    pub expected: EntityId,
    pub predicted: EntityId,
    pub correct: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub outcomes: Vec<RecordOutcome>,
    pub evaluated: usize,
    pub correct: usize,
    pub skipped: usize,
}

impl EvaluationReport {
    /// Micro-averaged precision over evaluated records. Every record gets
    /// exactly one prediction (possibly the sentinel), so this is the share
    /// answered correctly.
    pub fn precision(&self) -> f64 {
        if self.evaluated == 0 {
            0.0
        } else {
            self.correct as f64 / self.evaluated as f64
        }
    }
}

pub struct Evaluator<'e, S: GraphService + ?Sized> {
    engine: &'e SignatureEngine<S>,
    generator: Option<Box<dyn AnswerGenerator>>,
    linker: Option<Box<dyn EntityLinker>>,
}

impl<'e, S: GraphService + ?Sized> Evaluator<'e, S> {
    pub fn new(engine: &'e SignatureEngine<S>) -> Self {
        Self { engine, generator: None, linker: None }
    }

    pub fn with_answer_generator(mut self, generator: impl AnswerGenerator + 'static) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }

    pub fn with_entity_linker(mut self, linker: impl EntityLinker + 'static) -> Self {
        self.linker = Some(Box::new(linker));
        self
    }

    /// Evaluate `records` in order. Engine failures abort the run.
    pub async fn evaluate(&self, records: impl IntoIterator<Item = DatasetRecord>) -> Result<EvaluationReport> {
        let mut report = EvaluationReport::default();

        for record in records {
            let Some(record) = self.complete(record).await? else {
                report.skipped += 1;
                continue;
            };
            let (Some(question), Some(expected), Some(candidates)) = (
                record.question_entity,
                record.answer_entity,
                record.predicted_answer_entities.as_deref(),
            ) else {
                report.skipped += 1;
                continue;
            };

            let answer = self.engine.answer(&question, candidates).await?;
            let correct = answer.entity == expected;
            info!(
                question = %record.question,
                answer = %answer.entity,
                expected = %expected,
                correct,
                "Evaluated"
            );

            report.evaluated += 1;
            report.correct += usize::from(correct);
            report.outcomes.push(RecordOutcome {
                question: record.question,
                expected,
                predicted: answer.entity,
                correct,
            });
        }

        info!(
            evaluated = report.evaluated,
            correct = report.correct,
            skipped = report.skipped,
            precision = report.precision(),
            "Evaluation finished"
        );
        Ok(report)
    }

    /// Fill a missing question entity and predictions from the
    /// collaborators. `None` when something needed is still missing.
    async fn complete(&self, mut record: DatasetRecord) -> Result<Option<DatasetRecord>> {
        if record.answer_entity.is_none() {
            warn!(question = %record.question, "No ground-truth answer; skipping");
            return Ok(None);
        }

        if record.question_entity.is_none() {
            if let Some(linker) = &self.linker {
                record.question_entity = linker.link_question(&record.question).await?;
            }
            if record.question_entity.is_none() {
                warn!(question = %record.question, "No question entity; skipping");
                return Ok(None);
            }
        }

        if record.predicted_answers.is_none() || record.predicted_answer_entities.is_none() {
            let (Some(generator), Some(linker)) = (&self.generator, &self.linker) else {
                warn!(question = %record.question, "No predicted answers; skipping");
                return Ok(None);
            };
            let answers = generator.generate(&record.question).await?;
            record.predicted_answer_entities = Some(linker.link_answers(&answers).await?);
            record.predicted_answers = Some(answers);
        }

        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_of_empty_report_is_zero() {
        assert_eq!(EvaluationReport::default().precision(), 0.0);
        let report = EvaluationReport { evaluated: 4, correct: 3, ..Default::default() };
        assert_eq!(report.precision(), 0.75);
    }
}
