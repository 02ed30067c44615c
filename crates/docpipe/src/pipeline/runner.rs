use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, info_span, warn};

use crate::broadcast::JobStore;
use crate::job::progress::{
    STAGE_CHUNKING, STAGE_COMPLETED, STAGE_DOWNLOADING, STAGE_EXTRACTING, STAGE_MEMORY,
    STAGE_MERGING, STAGE_PROCESSING,
};
use crate::job::{JobRecord, JobStatus, PagedOptions, PipelineOptions, Transition};
use crate::sanitize;
use crate::stream::StreamFrame;
use crate::worker::queue::{Lease, QueueError};

use super::checkpoint::Checkpoint;
use super::collaborators::{transform_with_timeout, Collaborators, Unit};
use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;
use super::memory::MemorySampler;
use super::progress::ProgressReporter;

/// What one attempt left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub attempt: u32,
    pub total_units: usize,
    pub completed_units: usize,
    /// Units that failed during this attempt.
    pub failed_units: usize,
    pub final_output_key: Option<String>,
}

impl RunSummary {
    fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            status: record.status,
            attempt: record.attempt,
            total_units: record.total_units,
            completed_units: record.result_paths.len(),
            failed_units: record.attempt_errors().count(),
            final_output_key: record.final_output_key.clone(),
        }
    }

    /// True when the attempt stopped with units left that another attempt could pick up.
    pub fn is_resumable(&self) -> bool {
        match self.status {
            JobStatus::Timeout => true,
            JobStatus::Failed => self.completed_units > 0 && self.completed_units < self.total_units,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The attempt ran and the job reached the recorded status.
    Finished(RunSummary),
    /// The job was not in a runnable state; nothing was written.
    Skipped { job_id: String, status: JobStatus },
}

/// Builds the terminal stream frame describing a job record.
pub fn result_frame(record: &JobRecord, elapsed: Option<Duration>) -> StreamFrame {
    let success = matches!(
        record.status,
        JobStatus::Completed | JobStatus::CompletedWithWarnings
    );
    let data = json!({
        "jobId": record.id,
        "status": record.status,
        "finalOutputKey": record.final_output_key,
        "resultPaths": record.result_paths,
        "failure": record.failure,
    });
    let stats = json!({
        "attempt": record.attempt,
        "unitKind": record.unit_kind,
        "totalUnits": record.total_units,
        "completedUnits": record.result_paths.len(),
        "failedUnits": record.attempt_errors().count(),
        "timeoutCount": record.timeout_count,
        "durationMs": elapsed.map(|d| d.as_millis() as u64),
    });
    StreamFrame::result(success, data, stats)
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: Arc<dyn JobStore>,
    collaborators: Collaborators,
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        store: Arc<dyn JobStore>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            store,
            collaborators,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Runs one attempt of a job from its persisted checkpoint.
    ///
    /// Unit failures and job-level failures are recorded on the job and
    /// reported as `Finished`. An `Err` means the attempt decided nothing:
    /// another writer took over, or the store could not be written.
    pub fn run(
        &self,
        job_id: &str,
        progress: &dyn ProgressReporter,
        lease: Option<Lease>,
    ) -> Result<RunOutcome, PipelineError> {
        let mut ckpt = Checkpoint::load(
            Arc::clone(&self.store),
            job_id,
            self.config.checkpoint_retries,
            self.config.checkpoint_retry_delay,
        )?;

        let source = sanitize::redact_source(&ckpt.record().source);
        let _pipeline_span = info_span!("pipeline",
            job_id = %job_id,
            source = %source,
            attempt = ckpt.record().attempt,
            unit_kind = %ckpt.record().unit_kind,
        )
        .entered();

        let status = ckpt.record().status;
        if status.is_terminal() || status == JobStatus::Timeout {
            debug!("Job is {}, nothing to run", status);
            return Ok(RunOutcome::Skipped {
                job_id: job_id.to_string(),
                status,
            });
        }

        let mut ctx = PipelineContext::new(job_id, lease, self.config.attempt_deadline);

        let attempt = if status.is_running_stage() {
            self.recover_orphan(&mut ckpt)
                .and_then(|()| self.run_attempt(&mut ckpt, &mut ctx, progress))
        } else {
            self.run_attempt(&mut ckpt, &mut ctx, progress)
        };

        match attempt {
            Ok(()) => {
                let record = ckpt.record();
                info!(
                    status = %record.status,
                    completed = record.result_paths.len(),
                    failed = record.attempt_errors().count(),
                    "Attempt finished"
                );
                progress.report(result_frame(record, Some(ctx.elapsed())));
                Ok(RunOutcome::Finished(RunSummary::from_record(record)))
            }
            Err(e) if e.is_abandoned() => {
                warn!("{}", e);
                progress.report(StreamFrame::error(e.to_string(), "abandoned"));
                if matches!(e, PipelineError::Superseded { .. }) {
                    // A cancel lands as a terminal status; close the stream with it
                    if let Ok(stored) = self.store.load(job_id) {
                        if stored.status.is_terminal() {
                            progress.report(result_frame(&stored, Some(ctx.elapsed())));
                        }
                    }
                }
                Err(e)
            }
            Err(e) => {
                error!("Attempt aborted: {}", e);
                progress.report(StreamFrame::error(e.to_string(), "store"));
                Err(e)
            }
        }
    }

    /// A record found in a running stage belongs to a runner that died.
    fn recover_orphan(&self, ckpt: &mut Checkpoint) -> Result<(), PipelineError> {
        let status = ckpt.record().status;
        warn!("Recovering attempt interrupted during {}", status);

        ckpt.apply(
            Transition::to(JobStatus::Timeout)
                .message(format!("Attempt interrupted during {}", status)),
        )?;
        ckpt.commit_required()?;

        let next = if ckpt.record().total_units > 0 {
            JobStatus::Resuming
        } else {
            JobStatus::Restarting
        };
        ckpt.apply(Transition::to(next).message(format!("Recovering interrupted attempt ({})", next)))?;
        ckpt.commit_required()
    }

    fn run_attempt(
        &self,
        ckpt: &mut Checkpoint,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        ctx.resuming = ckpt.record().status == JobStatus::Resuming;
        let options = ckpt.record().options.clone();
        let model = &self.config.progress;

        // Step 1: Fetch
        let document = {
            let _step = info_span!("download").entered();
            self.enter_stage(
                ckpt,
                ctx,
                JobStatus::Downloading,
                STAGE_DOWNLOADING,
                "Fetching document".to_string(),
                model.threshold(STAGE_DOWNLOADING),
                progress,
            )?;
            match self.collaborators.fetcher.fetch(&ckpt.record().source) {
                Ok(document) => document,
                Err(e) => return self.fail_job(ckpt, e.to_string(), progress),
            }
        };

        // Step 2: Extract
        let content = {
            let _step = info_span!("extract").entered();
            self.enter_stage(
                ckpt,
                ctx,
                JobStatus::Extracting,
                STAGE_EXTRACTING,
                format!("Extracting content ({} bytes)", document.len()),
                model.threshold(STAGE_EXTRACTING),
                progress,
            )?;
            match self.collaborators.splitter.extract(document, &options) {
                Ok(content) => content,
                Err(e) => return self.fail_job(ckpt, e.to_string(), progress),
            }
        };

        // Step 3: Split into units
        {
            let _step = info_span!("chunk").entered();
            let kind = options.unit_kind();
            self.enter_stage(
                ckpt,
                ctx,
                JobStatus::Chunking,
                STAGE_CHUNKING,
                format!("Splitting document into {}s", kind),
                model.threshold(STAGE_CHUNKING),
                progress,
            )?;
            let units = match self.collaborators.splitter.split(&content, &options) {
                Ok(units) => normalize_units(units, &options),
                Err(e) => return self.fail_job(ckpt, e.to_string(), progress),
            };

            let expected = ckpt.record().total_units;
            if ctx.resuming && expected > 0 && expected != units.len() {
                return self.fail_job(
                    ckpt,
                    format!(
                        "Document now splits into {} {}s but the checkpoint has {}",
                        units.len(),
                        kind,
                        expected
                    ),
                    progress,
                );
            }

            let record = ckpt.record_mut();
            record.total_units = units.len();
            record.unit_kind = kind;
            record.push_message(format!("Split into {} {}s", units.len(), kind));
            ckpt.commit_required()?;
            ctx.units = units;
        }

        // Step 4: Process units
        {
            let _step = info_span!("process").entered();
            self.process_units(ckpt, ctx, &options, progress)?;
            if ckpt.record().status.is_terminal() || ckpt.record().status == JobStatus::Timeout {
                return Ok(());
            }
        }

        // Step 5: Merge
        let _step = info_span!("merge").entered();
        let verdict = ckpt.record().settle_status();
        if verdict == JobStatus::Failed {
            let record = ckpt.record();
            let reason = format!(
                "None of the {} {}s produced a result",
                record.total_units, record.unit_kind
            );
            return self.fail_job(ckpt, reason, progress);
        }

        let artifacts = ckpt.record().ordered_artifacts();
        self.enter_stage(
            ckpt,
            ctx,
            JobStatus::Merging,
            STAGE_MERGING,
            format!("Merging {} artifacts", artifacts.len()),
            model.threshold(STAGE_MERGING),
            progress,
        )?;

        match self.collaborators.merger.merge(&ctx.job_id, &artifacts) {
            Ok(key) => {
                let record = ckpt.record_mut();
                record.final_output_key = Some(key);
                let message = match verdict {
                    JobStatus::CompletedWithWarnings => format!(
                        "Completed with {} unresolved {}s",
                        record.unresolved_units(),
                        record.unit_kind
                    ),
                    _ => "Completed".to_string(),
                };
                ckpt.apply(
                    Transition::to(verdict)
                        .stage(STAGE_COMPLETED)
                        .message(message.clone())
                        .progress(model.threshold(STAGE_COMPLETED)),
                )?;
                ckpt.commit_required()?;
                progress.report(StreamFrame::progress(
                    STAGE_COMPLETED,
                    message,
                    ckpt.record().progress,
                ));
                Ok(())
            }
            Err(e) => self.fail_job(ckpt, e.to_string(), progress),
        }
    }

    fn process_units(
        &self,
        ckpt: &mut Checkpoint,
        ctx: &mut PipelineContext,
        options: &PipelineOptions,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let total = ctx.units.len();
        let kind = options.unit_kind();
        let model = &self.config.progress;

        let start = model.interpolate(STAGE_PROCESSING, ckpt.record().current_unit, total);
        self.enter_stage(
            ckpt,
            ctx,
            JobStatus::Processing,
            STAGE_PROCESSING,
            format!(
                "Processing {} {}s ({} already done)",
                total,
                kind,
                ckpt.record().result_paths.len()
            ),
            start,
            progress,
        )?;

        let mut memory = self.config.emit_memory_frames.then(MemorySampler::new);
        let units = std::mem::take(&mut ctx.units);
        for unit in &units {
            if ckpt.record().has_result(unit.index) {
                debug!(unit = unit.index, "Unit already has a result, skipping");
                continue;
            }
            if ctx.deadline_exceeded() {
                return self.time_out(ckpt, progress);
            }
            self.ensure_claim(ckpt, ctx)?;

            let message = self.process_unit(ckpt, unit, options, total, progress);

            let record = ckpt.record_mut();
            record.current_unit = record.current_unit.max(unit.index + 1);
            let value = model.interpolate(STAGE_PROCESSING, record.current_unit, total);
            record.advance_progress(value);
            record.push_message(message.clone());
            record.last_updated = chrono::Utc::now();
            ckpt.commit()?;

            progress.report(StreamFrame::progress(
                STAGE_PROCESSING,
                message,
                ckpt.record().progress,
            ));
            if let Some(ref mut sampler) = memory {
                if let Some(mb) = sampler.resident_mb() {
                    progress.report(StreamFrame::progress(
                        STAGE_MEMORY,
                        format!("Resident memory {:.1} MB", mb),
                        ckpt.record().progress,
                    ));
                }
            }

            if let Some(reason) = self.failure_ratio_exceeded(ckpt.record()) {
                return self.fail_job(ckpt, reason, progress);
            }
        }
        ctx.units = units;
        Ok(())
    }

    /// Transforms one unit and records the outcome; returns the log line.
    fn process_unit(
        &self,
        ckpt: &mut Checkpoint,
        unit: &Unit,
        options: &PipelineOptions,
        total: usize,
        progress: &dyn ProgressReporter,
    ) -> String {
        let _unit_span = info_span!("unit", index = unit.index).entered();
        let position = unit.index + 1;

        match transform_with_timeout(
            &self.collaborators.transformer,
            unit,
            options,
            self.config.unit_timeout,
        ) {
            Ok(artifact) => {
                if !ckpt.record_mut().record_result(unit.index, artifact) {
                    warn!(unit = unit.index, "Duplicate unit result ignored");
                }
                format!("Processed {} {}/{}", unit.kind, position, total)
            }
            Err(e) => {
                warn!(unit = unit.index, "{}", e);
                let kind = e.kind();
                ckpt.record_mut()
                    .record_error(unit.index, kind, e.to_string());
                let details = match kind {
                    crate::job::ErrorKind::Timeout => "timeout",
                    crate::job::ErrorKind::Other => "other",
                };
                progress.report(StreamFrame::error(
                    format!("{} {} failed: {}", unit.kind, position, e),
                    details,
                ));
                format!("{} {}/{} failed", unit.kind, position, total)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn enter_stage(
        &self,
        ckpt: &mut Checkpoint,
        ctx: &PipelineContext,
        status: JobStatus,
        stage: &str,
        message: String,
        value: u8,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        self.ensure_claim(ckpt, ctx)?;

        if ckpt.record().status == JobStatus::Resuming && status != JobStatus::Processing {
            // A resumed attempt re-runs the early stages under the resuming status
            let record = ckpt.record_mut();
            record.stage = stage.to_string();
            record.advance_progress(value);
            record.push_message(message.clone());
            record.last_updated = chrono::Utc::now();
        } else {
            ckpt.apply(
                Transition::to(status)
                    .stage(stage)
                    .message(message.clone())
                    .progress(value),
            )?;
        }
        ckpt.commit()?;

        progress.report(StreamFrame::progress(stage, message, ckpt.record().progress));
        Ok(())
    }

    /// Abandons the attempt when the record moved on or the queue claim expired.
    fn ensure_claim(&self, ckpt: &Checkpoint, ctx: &PipelineContext) -> Result<(), PipelineError> {
        ckpt.ensure_current()?;
        if let Some(ref lease) = ctx.lease {
            match lease.renew() {
                Ok(()) => {}
                Err(QueueError::ClaimLost(_)) => {
                    return Err(PipelineError::ClaimLost {
                        job_id: ctx.job_id.clone(),
                    })
                }
                Err(e) => warn!("Failed to renew queue claim: {}", e),
            }
        }
        Ok(())
    }

    fn fail_job(
        &self,
        ckpt: &mut Checkpoint,
        reason: String,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        error!("Job failed: {}", reason);
        ckpt.record_mut().failure = Some(reason.clone());
        ckpt.apply(Transition::to(JobStatus::Failed).message(reason.clone()))?;
        ckpt.commit_required()?;
        progress.report(StreamFrame::error(reason, "fatal"));
        Ok(())
    }

    fn time_out(
        &self,
        ckpt: &mut Checkpoint,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let record = ckpt.record();
        let message = format!(
            "Attempt deadline exceeded after {}/{} {}s",
            record.current_unit, record.total_units, record.unit_kind
        );
        warn!("{}", message);
        ckpt.apply(Transition::to(JobStatus::Timeout).message(message.clone()))?;
        ckpt.commit_required()?;
        progress.report(StreamFrame::error(message, "timeout"));
        Ok(())
    }

    fn failure_ratio_exceeded(&self, record: &JobRecord) -> Option<String> {
        let ratio = self.config.max_failure_ratio?;
        if record.total_units == 0 {
            return None;
        }
        let failed = record.attempt_errors().count();
        if failed as f64 / record.total_units as f64 > ratio {
            Some(format!(
                "{} of {} {}s failed, above the allowed ratio {}",
                failed, record.total_units, record.unit_kind, ratio
            ))
        } else {
            None
        }
    }
}

/// Orders units by index and renumbers them densely from zero.
fn normalize_units(mut units: Vec<Unit>, options: &PipelineOptions) -> Vec<Unit> {
    units.sort_by_key(|u| u.index);
    let kind = options.unit_kind();
    for (position, unit) in units.iter_mut().enumerate() {
        unit.index = position;
        unit.kind = kind;
    }
    if let PipelineOptions::Paged(PagedOptions {
        max_pages: Some(max),
        ..
    }) = options
    {
        units.truncate(*max as usize);
    }
    units
}
