//! Bounded-concurrency fan-out of row tasks.

use crate::batch::client::AiClient;
use crate::batch::recorder::{OutcomeRecorder, RowOutcome};
use crate::batch::types::{BatchJob, ProgressCallback, RowProgress, RowStatus, RowTask};
use crate::prompts::{PromptContext, PromptTemplate, RenderOptions};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Placeholder that always receives the primary field.
pub const PRIMARY_PLACEHOLDER: &str = "abstract";
/// Placeholder that always receives the secondary field.
pub const SECONDARY_PLACEHOLDER: &str = "title";

/// Runs every row of a [`BatchJob`] under a counting semaphore.
///
/// Each row gets its own spawned task. A task acquires a permit only when it is about
/// to call the upstream, so at most `job.concurrency` requests are ever in flight.
/// Rows with a blank primary field settle as `Skipped` without taking a permit. A
/// task that panics is converted into an `Errored` row and never affects its siblings.
pub struct Dispatcher {
    client: AiClient,
    recorder: Arc<OutcomeRecorder>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("client", &self.client)
            .field("recorder", &self.recorder)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(client: AiClient, recorder: OutcomeRecorder) -> Self {
        Self { client, recorder: Arc::new(recorder), progress: None }
    }

    /// Invoke `callback` each time a row settles.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Process every row and return the settled tasks in input order.
    pub async fn run(&self, job: BatchJob) -> Vec<RowTask> {
        let total = job.tasks.len();
        let concurrency = job.concurrency.max(1);
        if total == 0 {
            return Vec::new();
        }

        info!(rows = total, concurrency, model = %job.request.model, "Dispatching batch");

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let template = Arc::new(job.template);
        let render = Arc::new(job.render);
        let completed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(total);
        let mut originals = Vec::with_capacity(total);

        for task in job.tasks {
            originals.push(task.clone());

            let semaphore = Arc::clone(&semaphore);
            let template = Arc::clone(&template);
            let render = Arc::clone(&render);
            let completed = Arc::clone(&completed);
            let client = self.client.clone();
            let recorder = Arc::clone(&self.recorder);
            let progress = self.progress.clone();

            handles.push(tokio::spawn(async move {
                let mut task = task;
                let row = task.index;
                let mut elapsed = None;

                let outcome = if task.has_empty_primary() {
                    debug!(row, "Skipping row with empty primary field");
                    RowOutcome::Skipped
                } else {
                    match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            task.start();
                            let started = Instant::now();
                            let outcome = match render_prompt(&template, &task, &render) {
                                Ok(prompt) => RowOutcome::Response(client.send(&prompt).await),
                                Err(e) => RowOutcome::Errored(format!("Prompt rendering failed: {e}")),
                            };
                            elapsed = Some(started.elapsed());
                            outcome
                        }
                        Err(e) => RowOutcome::Errored(format!("Concurrency limiter closed: {e}")),
                    }
                };

                let requested = matches!(outcome, RowOutcome::Response(_));
                let status = recorder.record(&mut task, outcome);
                if let (true, Some(elapsed)) = (requested, elapsed) {
                    client.monitor().record_request(status == RowStatus::Success, elapsed);
                }

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(row, status = %status, completed = done, total, "Row settled");
                notify(progress.as_ref(), row, status, done, total);
                task
            }));
        }

        let mut settled = Vec::with_capacity(total);
        for (handle, original) in handles.into_iter().zip(originals) {
            match handle.await {
                Ok(task) => settled.push(task),
                Err(e) => {
                    let row = original.index;
                    error!(row, error = %e, "Row task aborted");
                    let mut task = original;
                    let status = self.recorder.record(&mut task, RowOutcome::Errored(format!("Row task aborted: {e}")));
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    notify(self.progress.as_ref(), row, status, done, total);
                    settled.push(task);
                }
            }
        }

        info!(rows = total, "Batch dispatch completed");
        settled
    }
}

fn notify(progress: Option<&ProgressCallback>, index: usize, status: RowStatus, completed: usize, total: usize) {
    if let Some(callback) = progress {
        callback(RowProgress { index, status, completed, total });
    }
}

/// Build the placeholder values for one row.
///
/// Every input column is available under its header name. The mapped fields are also
/// available as `{{abstract}}` and `{{title}}` unless a column already uses that name.
pub fn prompt_context(task: &RowTask) -> PromptContext {
    let mut context = PromptContext::new();
    context.set(PRIMARY_PLACEHOLDER, task.primary.clone());
    context.set(SECONDARY_PLACEHOLDER, task.secondary.clone());
    for (name, value) in &task.inputs {
        context.set(name, value.clone());
    }
    context
}

/// Render the prompt for one row.
///
/// # Errors
///
/// Returns `PromptError::MissingPlaceholder` in strict mode when a placeholder has no value.
pub fn render_prompt(
    template: &PromptTemplate,
    task: &RowTask,
    options: &RenderOptions,
) -> crate::prompts::templates::Result<String> {
    template.render_with_options(&prompt_context(task), options)
}
