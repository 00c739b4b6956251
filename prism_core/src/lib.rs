pub use backend::{Availability, Backend, BackendSet, Completion};
pub use bundle::{Bundle, BundleManifest, BundleOptions, Bundler, Classification, FileEntry};
pub use config::{BackendDescriptor, BackendId, GeminiMode, RelayConfig, Settings};
pub use dispatch::{BackendStatus, DispatchOutcome, Dispatcher, QueryRequest, QueryResult};
pub use error::{BackendError, BundleError, DispatchError, RelayError};
pub use relay::{BundledReply, Relay};

pub mod backend;
pub mod bundle;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod relay;
