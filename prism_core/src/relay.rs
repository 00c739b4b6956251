//! Entry point tying configuration, dispatch and bundling together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::BackendSet;
use crate::bundle::{Bundle, BundleOptions, Bundler};
use crate::config::{BackendId, RelayConfig};
use crate::dispatch::{BackendStatus, DispatchOutcome, Dispatcher, QueryRequest, QueryResult};
use crate::error::{DispatchError, RelayError};

/// Answer to a bundle-then-query or bundle-then-compare call.
#[derive(Debug, Clone)]
pub struct BundledReply<T> {
    pub bundle: Bundle,
    pub reply: T,
}

#[derive(Clone)]
pub struct Relay {
    config: Arc<RelayConfig>,
    dispatcher: Dispatcher,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let backends = BackendSet::from_config(&config);
        Self::with_backends(config, backends)
    }

    /// Uses prebuilt adapters instead of resolving them from `config`.
    pub fn with_backends(config: RelayConfig, backends: BackendSet) -> Self {
        let dispatcher = Dispatcher::new(Arc::new(backends), config.timeout);
        Self {
            config: Arc::new(config),
            dispatcher,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub async fn query(
        &self,
        backend: BackendId,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<QueryResult, DispatchError> {
        let request = QueryRequest::new(backend, prompt).with_model(model.map(str::to_string));
        self.dispatcher.query(request).await
    }

    pub async fn compare(
        &self,
        backends: &[BackendId],
        prompt: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher.compare(backends, prompt, None).await
    }

    pub async fn status(&self) -> Vec<BackendStatus> {
        self.dispatcher.status().await
    }

    /// Bundles on the blocking pool so the walk never stalls the runtime.
    pub async fn bundle(&self, root: &Path, options: BundleOptions) -> Result<Bundle, RelayError> {
        let root: PathBuf = root.to_path_buf();
        let bundler = Bundler::new(options);
        let bundle = tokio::task::spawn_blocking(move || bundler.bundle(&root))
            .await
            .map_err(|e| RelayError::BundleTask(e.to_string()))??;
        Ok(bundle)
    }

    pub async fn bundle_query(
        &self,
        backend: BackendId,
        root: &Path,
        options: BundleOptions,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<BundledReply<QueryResult>, RelayError> {
        let bundle = self.bundle(root, options).await?;
        let request = QueryRequest::new(backend, prompt)
            .with_model(model.map(str::to_string))
            .with_context(Some(bundle.artifact.clone()));
        let reply = self.dispatcher.query(request).await?;
        Ok(BundledReply { bundle, reply })
    }

    pub async fn bundle_compare(
        &self,
        backends: &[BackendId],
        root: &Path,
        options: BundleOptions,
        prompt: &str,
    ) -> Result<BundledReply<DispatchOutcome>, RelayError> {
        let bundle = self.bundle(root, options).await?;
        let reply = self
            .dispatcher
            .compare(backends, prompt, Some(&bundle.artifact))
            .await?;
        Ok(BundledReply { bundle, reply })
    }
}
