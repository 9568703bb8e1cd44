// SDM gateway core engine
//
// Runtime data plane: SSRF-safe URL validation, per-connection OAuth2 token
// cache, buffered single-call executor, dependency auto-resolver and the
// layered orchestrator. Persistence is reached only through the store traits
// in `stores` so the engine stays DB-agnostic.

pub mod definition;
pub mod error;
pub mod executor;
pub mod json_path;
pub mod oauth;
pub mod orchestrator;
pub mod resolver;
pub mod stores;
pub mod topo;
pub mod url_guard;

pub use definition::{ApiDefinition, DependencySpec, FieldMapping, QueryParam, ResponseField};
pub use error::{GatewayError, Result};
pub use executor::{ApiExecutor, ExecuteOutcome};
pub use oauth::TokenCache;
pub use orchestrator::{
    CallResult, ExecutionMode, Orchestrator, OrchestratorCall, OrchestratorResult,
    MAX_BATCH_CALLS,
};
pub use resolver::{AutoResolver, OverrideSource, ResolvedPlan};
pub use stores::{ConnectionCredentials, ConnectionStore, DefinitionStore};
pub use url_guard::{UrlViolation, ValidatedTarget};
