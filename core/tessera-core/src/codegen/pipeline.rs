//! Pipeline
//!
//! 한 번의 제어 흐름을 공유하는 연산자 단계들의 순서 있는 체인. 단계는 위에서
//! 아래로 저장된다: 0번 단계가 싱크(루트 파이프라인이면 결과 싱크, 자식
//! 파이프라인이면 경계를 설치한 블로킹 연산자)이고, `i`번 단계의 consumer는
//! `i - 1`번 단계다. 마지막 단계가 소스다.

use super::code_gen::{FinishFn, PartitionFn, SourceFn, ThreadInitFn};
use super::query::PipelineStep;
use super::query_state::{QueryState, StateSlot};
use crate::error::{TesseraError, TesseraResult};
use std::any::Any;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub usize);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TranslatorId(pub usize);

/// Position of one translator inside one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerContext {
    pub pipeline: PipelineId,
    pub stage: usize,
}

impl ConsumerContext {
    /// The downstream stage rows flow into; `None` at the sink
    pub fn next(&self) -> Option<ConsumerContext> {
        self.stage.checked_sub(1).map(|stage| ConsumerContext {
            pipeline: self.pipeline,
            stage,
        })
    }
}

struct Source {
    producer: TranslatorId,
    source: SourceFn,
    partition: Option<PartitionFn>,
}

pub struct Pipeline {
    id: PipelineId,
    parent: Option<PipelineId>,
    stages: Vec<TranslatorId>,
    parallel: bool,
    thread_state: QueryState,
    thread_inits: Vec<ThreadInitFn>,
    finish: Vec<FinishFn>,
    source: Option<Source>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("stages", &self.stages)
            .field("parallel", &self.parallel)
            .field("thread_slots", &self.thread_state.len())
            .finish()
    }
}

impl Pipeline {
    pub fn new(id: PipelineId, parent: Option<PipelineId>, parallel: bool) -> Self {
        Self {
            id,
            parent,
            stages: Vec::new(),
            parallel,
            thread_state: QueryState::new(),
            thread_inits: Vec::new(),
            finish: Vec::new(),
            source: None,
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn parent(&self) -> Option<PipelineId> {
        self.parent
    }

    /// Append `translator` as the next (more upstream) stage
    pub fn add(&mut self, translator: TranslatorId) -> ConsumerContext {
        self.stages.push(translator);
        ConsumerContext {
            pipeline: self.id,
            stage: self.stages.len() - 1,
        }
    }

    pub fn stages(&self) -> &[TranslatorId] {
        &self.stages
    }

    pub fn translator_at(&self, stage: usize) -> Option<TranslatorId> {
        self.stages.get(stage).copied()
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Force a single worker for the whole pipeline
    pub fn set_serial(&mut self, reason: &str) {
        if self.parallel {
            debug!(pipeline = %self.id, reason, "pipeline forced serial");
        }
        self.parallel = false;
    }

    /// Register a per-worker slot of this pipeline
    pub fn register_thread_state<T: Any + Send + Sync>(&mut self, name: &str) -> TesseraResult<StateSlot<T>> {
        self.thread_state.register_unique(name)
    }

    pub fn add_thread_init(&mut self, init: ThreadInitFn) {
        self.thread_inits.push(init);
    }

    /// Hook run once after every worker of this pipeline completed
    pub fn add_finish(&mut self, finish: FinishFn) {
        self.finish.push(finish);
    }

    pub fn set_source(
        &mut self,
        producer: TranslatorId,
        source: SourceFn,
        partition: Option<PartitionFn>,
    ) -> TesseraResult<()> {
        if let Some(existing) = &self.source {
            return Err(TesseraError::Config(format!(
                "{} already has a source (translator {})",
                self.id, existing.producer.0
            )));
        }
        self.source = Some(Source {
            producer,
            source,
            partition,
        });
        Ok(())
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub(crate) fn to_step(&self) -> TesseraResult<PipelineStep> {
        let source = self.source.as_ref().ok_or_else(|| {
            TesseraError::Config(format!("{} was never given a source", self.id))
        })?;
        Ok(PipelineStep {
            pipeline: self.id,
            parallel: self.parallel && source.partition.is_some(),
            thread_layout: self.thread_state.layout(),
            thread_inits: self.thread_inits.clone(),
            source: source.source.clone(),
            partition: source.partition.clone(),
            finish: self.finish.clone(),
        })
    }
}
