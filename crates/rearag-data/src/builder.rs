//! Building traces for a whole question set
//!
//! Questions fan out over a bounded pool of tokio tasks. Each task owns its
//! construction state and sends a finished [`TraceRecord`] over a channel to
//! the single consumer, which appends to the output file every
//! `save_batch_size` records. Re-running against the same output file only
//! processes questions whose id is not already there.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::construct::{ConstructionOutcome, TraceConstructor};
use crate::error::Result;
use crate::store::{QuestionRecord, RecordId, TraceRecord, append_jsonl, load_completed_ids};

#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// JSONL file traces are appended to
    pub output_path: PathBuf,
    pub num_workers: usize,
    pub save_batch_size: usize,
}

/// Counts from one build run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Questions already present in the output, or repeated in the input
    pub skipped: usize,
    /// Questions handed to workers
    pub submitted: usize,
    /// Records appended to the output
    pub persisted: usize,
    /// Persisted records that carry a finished conversation
    pub with_conversation: usize,
}

pub struct BatchBuilder {
    constructor: Arc<TraceConstructor>,
    config: BuildConfig,
    cancel: CancellationToken,
}

impl BatchBuilder {
    pub fn new(constructor: TraceConstructor, config: BuildConfig) -> Self {
        Self {
            constructor: Arc::new(constructor),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build traces for every question not yet in the output file.
    ///
    /// On cancellation, questions not yet started are dropped and everything
    /// already finished is still written.
    pub async fn run(&self, questions: Vec<QuestionRecord>) -> Result<BuildReport> {
        let output = &self.config.output_path;
        let mut seen = load_completed_ids(output)?;
        let mut report = BuildReport::default();

        let mut pending = Vec::new();
        for (idx, q) in questions.into_iter().enumerate() {
            let id = q.id.clone().unwrap_or_else(|| RecordId::from(idx));
            if seen.insert(id.clone()) {
                pending.push((id, q));
            } else {
                report.skipped += 1;
            }
        }
        report.submitted = pending.len();
        tracing::info!(
            pending = report.submitted,
            skipped = report.skipped,
            output = %output.display(),
            "starting trace construction"
        );

        let workers = self.config.num_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let (tx, mut rx) = mpsc::channel::<TraceRecord>(workers * 2);

        for (id, question) in pending {
            let sem = Arc::clone(&semaphore);
            let constructor = Arc::clone(&self.constructor);
            let cancel = self.cancel.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }
                let conversation = match constructor.construct(&question.question, &cancel).await {
                    ConstructionOutcome::Built(conv) => Some(conv),
                    ConstructionOutcome::GaveUp => None,
                    ConstructionOutcome::Cancelled => return,
                };
                let record = TraceRecord {
                    id,
                    question: question.question,
                    answer: question.answer,
                    conversation,
                };
                let _ = tx.send(record).await;
            });
        }
        drop(tx);

        let batch_size = self.config.save_batch_size.max(1);
        let mut buffer: Vec<TraceRecord> = Vec::with_capacity(batch_size);
        while let Some(record) = rx.recv().await {
            buffer.push(record);
            if buffer.len() >= batch_size {
                self.flush(&mut buffer, &mut report)?;
            }
        }
        self.flush(&mut buffer, &mut report)?;

        tracing::info!(
            persisted = report.persisted,
            with_conversation = report.with_conversation,
            cancelled = self.cancel.is_cancelled(),
            "trace construction finished"
        );
        Ok(report)
    }

    fn flush(&self, buffer: &mut Vec<TraceRecord>, report: &mut BuildReport) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        append_jsonl(&self.config.output_path, buffer)?;
        let with_conv = buffer.iter().filter(|r| r.conversation.is_some()).count();
        report.persisted += buffer.len();
        report.with_conversation += with_conv;
        tracing::info!(
            saved = buffer.len(),
            total = report.persisted,
            "saved batch of traces"
        );
        buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::construct::ConstructionConfig;
    use crate::store::{GroundTruth, read_jsonl};
    use rearag_agent::RagClient;
    use rearag_agent::RagConfig;
    use rearag_agent::testing::{ScriptedGenerator, ScriptedRetriever};
    use rearag_ai::{PromptSet, TemplateKind};
    use tempfile::TempDir;

    const FINISH: &str = "Thought 1: Done.\nAction 1:\n```\n{\"function\": \"finish\", \"parameters\": {\"answer\": \"x\"}}\n```";

    /// The construction model finishes immediately unless the question
    /// is tagged `#hard`, which it never answers properly
    fn builder(dir: &TempDir, workers: usize, batch: usize) -> (BatchBuilder, Arc<ScriptedGenerator>) {
        let model = Arc::new(ScriptedGenerator::from_fn(|prompt| {
            if prompt.contains("#hard") {
                Ok("no idea".into())
            } else {
                Ok(FINISH.into())
            }
        }));
        let rag = Arc::new(RagClient::new(
            Arc::new(ScriptedGenerator::from_fn(|_| Ok("obs".into()))),
            Arc::new(ScriptedRetriever::always(["doc"])),
            TemplateKind::ChatMl.build(),
            Arc::new(PromptSet::default()),
            RagConfig::default(),
        ));
        let config = ConstructionConfig {
            retry_budget: 1,
            ..ConstructionConfig::default()
        };
        let constructor =
            TraceConstructor::new(model.clone(), TemplateKind::ChatMl.build(), rag, config);
        let builder = BatchBuilder::new(
            constructor,
            BuildConfig {
                output_path: dir.path().join("out").join("traces.jsonl"),
                num_workers: workers,
                save_batch_size: batch,
            },
        );
        (builder, model)
    }

    fn questions(texts: &[&str]) -> Vec<QuestionRecord> {
        texts
            .iter()
            .enumerate()
            .map(|(i, q)| QuestionRecord {
                id: Some(RecordId::from(i)),
                question: q.to_string(),
                answer: GroundTruth::One("x".into()),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_builds_and_persists_all() {
        let dir = TempDir::new().unwrap();
        let (builder, _) = builder(&dir, 3, 2);
        let report = builder
            .run(questions(&["q0", "q1", "q2 #hard", "q3", "q4"]))
            .await
            .unwrap();

        assert_eq!(report.submitted, 5);
        assert_eq!(report.persisted, 5);
        assert_eq!(report.with_conversation, 4);

        let records: Vec<TraceRecord> = read_jsonl(&builder.config.output_path).unwrap();
        let ids: HashSet<_> = records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), 5);
        let hard = records.iter().find(|r| r.question == "q2 #hard").unwrap();
        assert!(hard.conversation.is_none());
    }

    #[tokio::test]
    async fn test_rerun_only_processes_missing_ids() {
        let dir = TempDir::new().unwrap();
        let (first, _) = builder(&dir, 2, 10);
        first.run(questions(&["q0", "q1 #hard"])).await.unwrap();

        let (second, model) = builder(&dir, 2, 10);
        let report = second
            .run(questions(&["q0", "q1 #hard", "q2", "q3"]))
            .await
            .unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.submitted, 2);
        assert_eq!(model.call_count(), 2);

        let records: Vec<TraceRecord> = read_jsonl(&second.config.output_path).unwrap();
        assert_eq!(records.len(), 4);
        let ids: HashSet<_> = records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_input_ids_built_once() {
        let dir = TempDir::new().unwrap();
        let (builder, _) = builder(&dir, 2, 1);
        let mut qs = questions(&["q0", "q1"]);
        qs.push(qs[0].clone());
        let report = builder.run(qs).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.persisted, 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let (builder, model) = builder(&dir, 2, 1);
        builder.cancel_token().cancel();
        let report = builder.run(questions(&["q0", "q1"])).await.unwrap();
        assert_eq!(report.persisted, 0);
        assert_eq!(model.call_count(), 0);
        assert!(!builder.config.output_path.exists());
    }
}
