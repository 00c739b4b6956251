//! Concurrent fan-out of one prompt to several backends.
//!
//! Every backend runs in its own task with its own deadline; results are
//! joined in request order and failures become part of the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{Availability, BackendSet};
use crate::config::BackendId;
use crate::error::{BackendError, DispatchError};

/// Upper bound on distinct backends per dispatch.
pub const MAX_BACKENDS: usize = 3;
/// Compare needs at least this many ids before deduplication.
pub const MIN_COMPARE_BACKENDS: usize = 2;

/// Slack on top of the adapter timeout before the engine gives up on a task.
const BACKSTOP_MARGIN: Duration = Duration::from_secs(5);

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";
const AUTO_MODEL: &str = "auto-detect";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub backend: BackendId,
    pub prompt: String,
    pub model: Option<String>,
    pub context: Option<String>,
}

impl QueryRequest {
    pub fn new(backend: BackendId, prompt: impl Into<String>) -> Self {
        Self {
            backend,
            prompt: prompt.into(),
            model: None,
            context: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// Prompt actually sent: context, separator, then the caller's prompt.
    pub fn effective_prompt(&self) -> String {
        match self.context.as_deref().filter(|c| !c.is_empty()) {
            Some(context) => format!("{}{}{}", context, CONTEXT_SEPARATOR, self.prompt),
            None => self.prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub backend: BackendId,
    pub model: String,
    pub label: String,
    pub reply: Result<String, BackendError>,
    pub elapsed: Duration,
}

impl QueryResult {
    pub fn is_success(&self) -> bool {
        self.reply.is_ok()
    }

    /// Labeled section as rendered by the compare operation.
    pub fn render_section(&self) -> String {
        let header = format!("## {} ({})", self.label, self.model);
        match &self.reply {
            Ok(text) => format!("{}\n\n{}", header, text),
            Err(err) => format!("{}\n\nError: {}", header, err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub results: Vec<QueryResult>,
    pub succeeded: usize,
    pub failed: usize,
}

impl DispatchOutcome {
    fn from_results(results: Vec<QueryResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let failed = results.len() - succeeded;
        Self {
            results,
            succeeded,
            failed,
        }
    }

    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.succeeded == 0
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{}/{} providers responded",
            self.succeeded,
            self.results.len()
        )
    }
}

/// Per-backend availability row for the status listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    pub backend: BackendId,
    pub label: String,
    pub default_model: String,
    pub available_models: String,
    pub availability: Availability,
}

#[derive(Clone)]
pub struct Dispatcher {
    backends: Arc<BackendSet>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(backends: Arc<BackendSet>, timeout: Duration) -> Self {
        Self { backends, timeout }
    }

    pub async fn query(&self, request: QueryRequest) -> Result<QueryResult, DispatchError> {
        self.backends
            .get(request.backend)
            .ok_or(DispatchError::UnknownBackend(request.backend))?;
        let mut outcome = self.fan_out(vec![request]).await;
        outcome
            .results
            .pop()
            .ok_or(DispatchError::NoBackends)
    }

    /// Runs one prompt against up to [`MAX_BACKENDS`] distinct backends.
    pub async fn dispatch(
        &self,
        backends: &[BackendId],
        prompt: &str,
        model: Option<&str>,
        context: Option<&str>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let ids = dedupe(backends);
        if ids.is_empty() {
            return Err(DispatchError::NoBackends);
        }
        if ids.len() > MAX_BACKENDS {
            return Err(DispatchError::TooManyBackends {
                max: MAX_BACKENDS,
                requested: ids.len(),
            });
        }
        if let Some(missing) = ids.iter().find(|id| self.backends.get(**id).is_none()) {
            return Err(DispatchError::UnknownBackend(*missing));
        }

        let requests = ids
            .into_iter()
            .map(|id| {
                QueryRequest::new(id, prompt)
                    .with_model(model.map(str::to_string))
                    .with_context(context.map(str::to_string))
            })
            .collect();
        Ok(self.fan_out(requests).await)
    }

    /// Dispatch that requires at least two ids as given by the caller.
    /// Duplicates still collapse, so `[a, a]` yields one result.
    pub async fn compare(
        &self,
        backends: &[BackendId],
        prompt: &str,
        context: Option<&str>,
    ) -> Result<DispatchOutcome, DispatchError> {
        if backends.len() < MIN_COMPARE_BACKENDS {
            return Err(DispatchError::TooFewBackends {
                min: MIN_COMPARE_BACKENDS,
                requested: backends.len(),
            });
        }
        self.dispatch(backends, prompt, None, context).await
    }

    /// Probes every configured backend concurrently without sending a query.
    pub async fn status(&self) -> Vec<BackendStatus> {
        let handles: Vec<_> = self
            .backends
            .iter()
            .map(|entry| {
                let adapter = entry.adapter.clone();
                let handle = tokio::spawn(async move { adapter.probe().await });
                (entry, handle)
            })
            .collect();

        let mut rows = Vec::with_capacity(handles.len());
        for (entry, handle) in handles {
            let availability = match handle.await {
                Ok(availability) => availability,
                Err(err) => Availability::unavailable(format!("probe aborted: {}", err)),
            };
            rows.push(BackendStatus {
                backend: entry.descriptor.id,
                label: entry.descriptor.label.clone(),
                default_model: entry.descriptor.default_model.clone(),
                available_models: entry.descriptor.available_models.clone(),
                availability,
            });
        }
        rows
    }

    async fn fan_out(&self, requests: Vec<QueryRequest>) -> DispatchOutcome {
        let started = Instant::now();
        let mut pending = Vec::with_capacity(requests.len());

        for request in requests {
            // Callers validate ids before fanning out.
            let Some(entry) = self.backends.get(request.backend).cloned() else {
                continue;
            };
            let timeout = self.timeout;
            let prompt = request.effective_prompt();
            let model = request.model.clone();
            let adapter = entry.adapter;
            let spawned = Instant::now();
            let handle = tokio::spawn(async move {
                let call = adapter.execute(&prompt, model.as_deref(), timeout);
                let result = match tokio::time::timeout(timeout + BACKSTOP_MARGIN, call).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(timeout)),
                };
                (result, spawned.elapsed())
            });
            pending.push((request, entry.descriptor, spawned, handle));
        }

        let mut results = Vec::with_capacity(pending.len());
        for (request, descriptor, spawned, handle) in pending {
            // Timed inside the task, not at join.
            let (joined, elapsed) = match handle.await {
                Ok((result, elapsed)) => (Ok(result), elapsed),
                Err(join_err) => (Err(join_err), spawned.elapsed()),
            };
            let fallback_model = request
                .model
                .clone()
                .or_else(|| Some(descriptor.default_model.clone()).filter(|m| !m.is_empty()))
                .unwrap_or_else(|| AUTO_MODEL.to_string());

            let (model, reply) = match joined {
                Ok(Ok(completion)) if completion.text.trim().is_empty() => (
                    completion.model,
                    Err(BackendError::NoResponse("empty reply".to_string())),
                ),
                Ok(Ok(completion)) => (completion.model, Ok(completion.text)),
                Ok(Err(err)) => (fallback_model, Err(err)),
                Err(join_err) => (fallback_model, Err(BackendError::Aborted(join_err.to_string()))),
            };

            match &reply {
                Ok(text) => tracing::debug!(
                    backend = %request.backend,
                    elapsed_ms = elapsed.as_millis() as u64,
                    reply_bytes = text.len(),
                    "backend responded"
                ),
                Err(err) => tracing::warn!(
                    backend = %request.backend,
                    elapsed_ms = elapsed.as_millis() as u64,
                    kind = err.kind(),
                    error = %err,
                    "backend failed"
                ),
            }

            results.push(QueryResult {
                backend: request.backend,
                model,
                label: descriptor.label,
                reply,
                elapsed,
            });
        }

        let outcome = DispatchOutcome::from_results(results);
        tracing::info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dispatch finished"
        );
        outcome
    }
}

fn dedupe(ids: &[BackendId]) -> Vec<BackendId> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    seen
}
