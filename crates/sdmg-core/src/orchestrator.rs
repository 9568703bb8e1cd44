// Batch orchestrator
//
// Executes a batch of named calls either all-concurrently (parallel mode) or
// as a topologically layered pipeline (sequential mode) where each layer runs
// concurrently, settles completely, and feeds its parsed response bodies into
// the injection context of later layers. Per-call upstream failures never
// abort the batch; they surface as rejected entries in the result.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::{ApiDefinition, DependencySpec};
use crate::error::{GatewayError, Result};
use crate::executor::ApiExecutor;
use crate::json_path;
use crate::resolver::ExecutionLayer;
use crate::stores::DefinitionStore;

/// Hard cap on calls per batch.
pub const MAX_BATCH_CALLS: usize = 20;

/// Matches JavaScript's encodeURIComponent: everything but alphanumerics
/// and `- _ . ! ~ * ' ( )` is percent-encoded.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// One call of a batch as submitted by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorCall {
    pub slug: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

/// Execution mode of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Parallel,
    Sequential,
}

/// Outcome of one call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CallResult {
    #[serde(rename_all = "camelCase")]
    Fulfilled {
        slug: String,
        status_code: u16,
        response_headers: HashMap<String, String>,
        /// Parsed JSON body when the upstream returned JSON, otherwise the
        /// raw string.
        response_body: Option<serde_json::Value>,
        response_size_bytes: u64,
        duration_ms: u64,
        layer: usize,
        #[serde(skip_serializing_if = "HashMap::is_empty")]
        injected_params: HashMap<String, String>,
    },
    #[serde(rename_all = "camelCase")]
    Rejected {
        slug: String,
        error: String,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        layer: Option<usize>,
    },
}

impl CallResult {
    pub fn slug(&self) -> &str {
        match self {
            CallResult::Fulfilled { slug, .. } | CallResult::Rejected { slug, .. } => slug,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, CallResult::Fulfilled { .. })
    }
}

/// Result of one orchestrated batch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorResult {
    pub total_duration_ms: u64,
    pub mode: ExecutionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<ExecutionLayer>>,
    pub results: Vec<CallResult>,
}

/// Executes batches of named calls through the executor.
pub struct Orchestrator {
    executor: Arc<ApiExecutor>,
    definitions: Arc<dyn DefinitionStore>,
}

impl Orchestrator {
    pub fn new(executor: Arc<ApiExecutor>, definitions: Arc<dyn DefinitionStore>) -> Self {
        Self {
            executor,
            definitions,
        }
    }

    /// Run a batch. `dynamic_deps` (from the auto-resolver) are merged with
    /// each definition's static dependencies in sequential mode.
    pub async fn run(
        &self,
        tenant_id: Uuid,
        connection_id: Uuid,
        calls: &[OrchestratorCall],
        mode: ExecutionMode,
        dynamic_deps: Option<&HashMap<String, Vec<DependencySpec>>>,
    ) -> Result<OrchestratorResult> {
        if calls.is_empty() {
            return Err(GatewayError::bad_request("At least one call is required"));
        }
        if calls.len() > MAX_BATCH_CALLS {
            return Err(GatewayError::bad_request(format!(
                "Too many calls in batch: {} (maximum {})",
                calls.len(),
                MAX_BATCH_CALLS
            )));
        }

        let slugs: Vec<String> = calls.iter().map(|c| c.slug.clone()).collect();
        let defs: HashMap<String, ApiDefinition> = self
            .definitions
            .fetch_by_slugs(tenant_id, &slugs)
            .await?
            .into_iter()
            .map(|d| (d.slug.clone(), d))
            .collect();

        let start = Instant::now();
        let (results, layers) = match mode {
            ExecutionMode::Parallel => {
                (self.run_parallel(connection_id, calls, &defs).await, None)
            }
            ExecutionMode::Sequential => {
                let (results, layers) = self
                    .run_sequential(connection_id, calls, &defs, dynamic_deps)
                    .await;
                (results, Some(layers))
            }
        };

        // Every slot is filled by construction; the fallback guards the
        // invariant without panicking.
        let results = results
            .into_iter()
            .zip(calls)
            .map(|(result, call)| {
                result.unwrap_or_else(|| CallResult::Rejected {
                    slug: call.slug.clone(),
                    error: "Call was never scheduled".to_string(),
                    duration_ms: 0,
                    layer: None,
                })
            })
            .collect();

        Ok(OrchestratorResult {
            total_duration_ms: start.elapsed().as_millis() as u64,
            mode,
            layers,
            results,
        })
    }

    async fn run_parallel(
        &self,
        connection_id: Uuid,
        calls: &[OrchestratorCall],
        defs: &HashMap<String, ApiDefinition>,
    ) -> Vec<Option<CallResult>> {
        let futures = calls.iter().map(|call| {
            let injected = HashMap::new();
            async move {
                Some(match defs.get(&call.slug) {
                    Some(def) => {
                        self.execute_call(connection_id, call, def, injected, 0)
                            .await
                    }
                    None => CallResult::Rejected {
                        slug: call.slug.clone(),
                        error: format!("API definition not found: {}", call.slug),
                        duration_ms: 0,
                        layer: Some(0),
                    },
                })
            }
        });
        join_all(futures).await
    }

    /// Layered execution. A rejected dependency does not suppress its
    /// dependents: they still run with whatever injection was possible and
    /// surface the upstream's reaction to the missing parameter.
    async fn run_sequential(
        &self,
        connection_id: Uuid,
        calls: &[OrchestratorCall],
        defs: &HashMap<String, ApiDefinition>,
        dynamic_deps: Option<&HashMap<String, Vec<DependencySpec>>>,
    ) -> (Vec<Option<CallResult>>, Vec<ExecutionLayer>) {
        let merged_deps: HashMap<String, Vec<DependencySpec>> = defs
            .values()
            .map(|def| {
                let mut deps: Vec<DependencySpec> =
                    def.foreign_dependencies().cloned().collect();
                if let Some(dynamic) = dynamic_deps.and_then(|m| m.get(&def.slug)) {
                    deps.extend(dynamic.iter().cloned());
                }
                (def.slug.clone(), deps)
            })
            .collect();

        // Nodes: distinct slugs that have a definition, in submission order.
        let mut seen = HashSet::new();
        let nodes: Vec<String> = calls
            .iter()
            .filter(|c| defs.contains_key(&c.slug))
            .filter(|c| seen.insert(c.slug.clone()))
            .map(|c| c.slug.clone())
            .collect();

        let edges: Vec<(String, String)> = merged_deps
            .iter()
            .flat_map(|(slug, deps)| {
                deps.iter()
                    .map(move |dep| (dep.api_slug.clone(), slug.clone()))
            })
            .collect();

        let sorted = crate::topo::layered_sort(&nodes, &edges);

        if !sorted.unplaced.is_empty() {
            // Cycle: nothing executes, every call is rejected with one message.
            let message = format!(
                "Circular dependency detected among: {}",
                sorted.unplaced.join(", ")
            );
            let results = calls
                .iter()
                .map(|call| {
                    Some(CallResult::Rejected {
                        slug: call.slug.clone(),
                        error: message.clone(),
                        duration_ms: 0,
                        layer: None,
                    })
                })
                .collect();
            let layers = sorted
                .layers
                .into_iter()
                .enumerate()
                .map(|(layer, slugs)| ExecutionLayer { layer, slugs })
                .collect();
            return (results, layers);
        }

        let layer_of: HashMap<&str, usize> = sorted
            .layers
            .iter()
            .enumerate()
            .flat_map(|(i, slugs)| slugs.iter().map(move |s| (s.as_str(), i)))
            .collect();

        let mut results: Vec<Option<CallResult>> = vec![None; calls.len()];
        let mut context: HashMap<String, serde_json::Value> = HashMap::new();

        for (call_index, call) in calls.iter().enumerate() {
            if !defs.contains_key(&call.slug) {
                results[call_index] = Some(CallResult::Rejected {
                    slug: call.slug.clone(),
                    error: format!("API definition not found: {}", call.slug),
                    duration_ms: 0,
                    layer: None,
                });
            }
        }

        for (layer_index, _) in sorted.layers.iter().enumerate() {
            let batch: Vec<(usize, &OrchestratorCall, &ApiDefinition)> = calls
                .iter()
                .enumerate()
                .filter(|(i, _)| results[*i].is_none())
                .filter_map(|(i, call)| {
                    defs.get(&call.slug).and_then(|def| {
                        (layer_of.get(call.slug.as_str()) == Some(&layer_index))
                            .then_some((i, call, def))
                    })
                })
                .collect();

            let futures = batch.iter().map(|&(_, call, def)| {
                let injected = self.injection_for(&merged_deps, &context, &call.slug);
                self.execute_call(connection_id, call, def, injected, layer_index)
            });
            let settled: Vec<CallResult> = join_all(futures).await;

            for ((call_index, _, _), outcome) in batch.iter().zip(settled) {
                if let CallResult::Fulfilled {
                    slug,
                    response_body: Some(body),
                    ..
                } = &outcome
                {
                    context.insert(slug.clone(), body.clone());
                }
                results[*call_index] = Some(outcome);
            }
        }

        let layers = sorted
            .layers
            .into_iter()
            .enumerate()
            .map(|(layer, slugs)| ExecutionLayer { layer, slugs })
            .collect();
        (results, layers)
    }

    /// Extract injected parameters for `slug` from earlier responses.
    fn injection_for(
        &self,
        merged_deps: &HashMap<String, Vec<DependencySpec>>,
        context: &HashMap<String, serde_json::Value>,
        slug: &str,
    ) -> HashMap<String, String> {
        let mut injected = HashMap::new();
        let Some(deps) = merged_deps.get(slug) else {
            return injected;
        };
        for dep in deps {
            let Some(response) = context.get(&dep.api_slug) else {
                continue;
            };
            for mapping in &dep.field_mappings {
                if let Some(value) = json_path::extract_as_string(response, &mapping.source) {
                    injected.insert(mapping.target.clone(), value);
                }
            }
        }
        injected
    }

    async fn execute_call(
        &self,
        connection_id: Uuid,
        call: &OrchestratorCall,
        def: &ApiDefinition,
        injected: HashMap<String, String>,
        layer: usize,
    ) -> CallResult {
        // Caller-supplied params always beat injection.
        let mut params = injected.clone();
        params.extend(call.params.clone());

        let path = compose_path(def, &params);
        let started = Instant::now();
        let outcome = self
            .executor
            .execute(
                connection_id,
                &def.method,
                &path,
                (!call.headers.is_empty()).then_some(&call.headers),
                call.body.as_ref(),
            )
            .await;

        match outcome {
            Ok(executed) => {
                let response_body = executed.response_body.map(|raw| {
                    // Parsed bodies feed the injection context; non-JSON
                    // bodies stay as plain strings.
                    serde_json::from_str::<serde_json::Value>(&raw)
                        .unwrap_or(serde_json::Value::String(raw))
                });
                CallResult::Fulfilled {
                    slug: call.slug.clone(),
                    status_code: executed.status_code,
                    response_headers: executed.response_headers,
                    response_body,
                    response_size_bytes: executed.response_size_bytes,
                    duration_ms: executed.duration_ms,
                    layer,
                    injected_params: injected,
                }
            }
            Err(error) => CallResult::Rejected {
                slug: call.slug.clone(),
                error: error.to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                layer: Some(layer),
            },
        }
    }
}

/// Substitute `{name}` placeholders, then append remaining declared query
/// parameters, all URI-component encoded.
fn compose_path(def: &ApiDefinition, params: &HashMap<String, String>) -> String {
    let mut path = def.path.clone();
    let mut substituted: HashSet<&str> = HashSet::new();

    for (name, value) in params {
        let placeholder = format!("{{{}}}", name);
        if path.contains(&placeholder) {
            path = path.replace(&placeholder, &encode_component(value));
            substituted.insert(name.as_str());
        }
    }

    for qp in &def.query_params {
        if substituted.contains(qp.name.as_str()) {
            continue;
        }
        let Some(value) = params.get(&qp.name) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let separator = if path.contains('?') { '&' } else { '?' };
        path.push(separator);
        path.push_str(&encode_component(&qp.name));
        path.push('=');
        path.push_str(&encode_component(value));
    }

    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FieldMapping, QueryParam};
    use crate::oauth::TokenCache;
    use crate::stores::{ConnectionCredentials, ConnectionStore};
    use async_trait::async_trait;
    use std::time::Duration;
    use wiremock::matchers::{method as http_method, path as http_path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakeConnections {
        base_url: String,
        token_url: String,
    }

    #[async_trait]
    impl ConnectionStore for FakeConnections {
        async fn fetch_credentials(
            &self,
            connection_id: Uuid,
        ) -> crate::error::Result<Option<ConnectionCredentials>> {
            Ok(Some(ConnectionCredentials {
                id: connection_id,
                tenant_id: Uuid::nil(),
                name: "test".to_string(),
                sap_base_url: self.base_url.clone(),
                token_url: self.token_url.clone(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                agent_api_url: None,
                agent_api_key: None,
                active: true,
            }))
        }
    }

    struct FakeDefinitions {
        defs: Vec<ApiDefinition>,
    }

    #[async_trait]
    impl DefinitionStore for FakeDefinitions {
        async fn fetch_by_slugs(
            &self,
            _tenant_id: Uuid,
            slugs: &[String],
        ) -> crate::error::Result<Vec<ApiDefinition>> {
            Ok(self
                .defs
                .iter()
                .filter(|d| slugs.contains(&d.slug))
                .cloned()
                .collect())
        }
    }

    fn def(slug: &str, path: &str) -> ApiDefinition {
        ApiDefinition {
            id: Uuid::now_v7(),
            tenant_id: Uuid::nil(),
            slug: slug.to_string(),
            name: slug.to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            query_params: vec![],
            request_headers: None,
            request_body: None,
            response_schema: None,
            depends_on: vec![],
            response_fields: vec![],
            tags: vec![],
            active: true,
        }
    }

    fn query_param_spec(name: &str, required: bool) -> QueryParam {
        QueryParam {
            name: name.to_string(),
            param_type: None,
            required,
            default: None,
            example: None,
        }
    }

    async fn orchestrator_for(server: &MockServer, defs: Vec<ApiDefinition>) -> Orchestrator {
        Mock::given(http_method("POST"))
            .and(http_path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "mock-bearer",
                "expires_in": 3600
            })))
            .mount(server)
            .await;

        let connections: Arc<dyn ConnectionStore> = Arc::new(FakeConnections {
            base_url: server.uri(),
            token_url: format!("{}/oauth/token", server.uri()),
        });
        let tokens = Arc::new(TokenCache::new(connections.clone()));
        let executor = Arc::new(ApiExecutor::new(connections, tokens));
        Orchestrator::new(executor, Arc::new(FakeDefinitions { defs }))
    }

    fn call(slug: &str) -> OrchestratorCall {
        OrchestratorCall {
            slug: slug.to_string(),
            params: HashMap::new(),
            headers: HashMap::new(),
            body: None,
        }
    }

    #[test]
    fn test_compose_path_placeholders_and_query() {
        let mut d = def("orders", "/v1/orders/{order}/components");
        d.query_params = vec![query_param_spec("plant", true), query_param_spec("limit", false)];

        let mut params = HashMap::new();
        params.insert("order".to_string(), "SO 100/1".to_string());
        params.insert("plant".to_string(), "P1".to_string());
        params.insert("limit".to_string(), "10".to_string());
        params.insert("ignored".to_string(), "x".to_string());

        let path = compose_path(&d, &params);
        assert!(path.starts_with("/v1/orders/SO%20100%2F1/components?"));
        assert!(path.contains("plant=P1"));
        assert!(path.contains("limit=10"));
        assert!(!path.contains("ignored"));
    }

    #[test]
    fn test_compose_path_skips_empty_and_placeholder_params() {
        let mut d = def("orders", "/v1/orders/{plant}");
        d.query_params = vec![query_param_spec("plant", true), query_param_spec("q", false)];

        let mut params = HashMap::new();
        params.insert("plant".to_string(), "P1".to_string());
        params.insert("q".to_string(), String::new());

        // plant went into the placeholder, empty q is dropped
        assert_eq!(compose_path(&d, &params), "/v1/orders/P1");
    }

    #[tokio::test]
    async fn test_parallel_mode_runs_all_at_layer_zero() {
        let server = MockServer::start().await;
        for p in ["a", "b"] {
            Mock::given(http_method("GET"))
                .and(http_path(format!("/v1/{}", p)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_delay(Duration::from_millis(50))
                        .set_body_json(serde_json::json!({"from": p})),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let orch = orchestrator_for(&server, vec![def("a", "/v1/a"), def("b", "/v1/b")]).await;
        let result = orch
            .run(
                Uuid::nil(),
                Uuid::now_v7(),
                &[call("a"), call("b")],
                ExecutionMode::Parallel,
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.results.len(), 2);
        assert!(result.results.iter().all(|r| r.is_fulfilled()));
        assert!(result.layers.is_none());
        // Concurrent, not serial: well under 2x the per-call delay.
        assert!(result.total_duration_ms < 90, "took {}ms", result.total_duration_ms);
        for r in &result.results {
            if let CallResult::Fulfilled { layer, .. } = r {
                assert_eq!(*layer, 0);
            }
        }
    }

    #[tokio::test]
    async fn test_sequential_injection_across_layers() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(http_path("/v1/a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{"plant": "P1"}]
            })))
            .mount(&server)
            .await;
        Mock::given(http_method("GET"))
            .and(http_path("/v1/b"))
            .and(query_param("plant", "P1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut b = def("b", "/v1/b");
        b.query_params = vec![query_param_spec("plant", true)];
        b.depends_on = vec![DependencySpec {
            api_slug: "a".to_string(),
            field_mappings: vec![FieldMapping {
                source: "value[0].plant".to_string(),
                target: "plant".to_string(),
            }],
        }];

        let orch = orchestrator_for(&server, vec![def("a", "/v1/a"), b]).await;
        let result = orch
            .run(
                Uuid::nil(),
                Uuid::now_v7(),
                &[call("a"), call("b")],
                ExecutionMode::Sequential,
                None,
            )
            .await
            .unwrap();

        let layers = result.layers.unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].slugs, vec!["a".to_string()]);
        assert_eq!(layers[1].slugs, vec!["b".to_string()]);

        match &result.results[1] {
            CallResult::Fulfilled {
                injected_params,
                layer,
                ..
            } => {
                assert_eq!(*layer, 1);
                assert_eq!(injected_params.get("plant").map(String::as_str), Some("P1"));
            }
            other => panic!("expected fulfilled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_caller_params_override_injection() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(http_path("/v1/a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{"plant": "P1"}]
            })))
            .mount(&server)
            .await;
        Mock::given(http_method("GET"))
            .and(http_path("/v1/b"))
            .and(query_param("plant", "OVERRIDE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut b = def("b", "/v1/b");
        b.query_params = vec![query_param_spec("plant", true)];
        b.depends_on = vec![DependencySpec {
            api_slug: "a".to_string(),
            field_mappings: vec![FieldMapping {
                source: "value[0].plant".to_string(),
                target: "plant".to_string(),
            }],
        }];

        let mut b_call = call("b");
        b_call
            .params
            .insert("plant".to_string(), "OVERRIDE".to_string());

        let orch = orchestrator_for(&server, vec![def("a", "/v1/a"), b]).await;
        let result = orch
            .run(
                Uuid::nil(),
                Uuid::now_v7(),
                &[call("a"), b_call],
                ExecutionMode::Sequential,
                None,
            )
            .await
            .unwrap();

        assert!(result.results.iter().all(|r| r.is_fulfilled()));
    }

    #[tokio::test]
    async fn test_cycle_rejects_everything_without_upstream_calls() {
        let server = MockServer::start().await;
        Mock::given(path_regex("^/v1/.*"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut a = def("a", "/v1/a");
        a.depends_on = vec![DependencySpec {
            api_slug: "b".to_string(),
            field_mappings: vec![],
        }];
        let mut b = def("b", "/v1/b");
        b.depends_on = vec![DependencySpec {
            api_slug: "a".to_string(),
            field_mappings: vec![],
        }];

        let orch = orchestrator_for(&server, vec![a, b]).await;
        let result = orch
            .run(
                Uuid::nil(),
                Uuid::now_v7(),
                &[call("a"), call("b")],
                ExecutionMode::Sequential,
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.results.len(), 2);
        for r in &result.results {
            match r {
                CallResult::Rejected { error, .. } => {
                    assert!(error.contains("Circular dependency"));
                    assert!(error.contains("a"));
                    assert!(error.contains("b"));
                }
                other => panic!("expected rejected, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_missing_definition_rejected_others_proceed() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(http_path("/v1/a"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let orch = orchestrator_for(&server, vec![def("a", "/v1/a")]).await;
        let result = orch
            .run(
                Uuid::nil(),
                Uuid::now_v7(),
                &[call("a"), call("ghost")],
                ExecutionMode::Sequential,
                None,
            )
            .await
            .unwrap();

        assert!(result.results[0].is_fulfilled());
        match &result.results[1] {
            CallResult::Rejected { error, .. } => {
                assert_eq!(error, "API definition not found: ghost")
            }
            other => panic!("expected rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_dependency_does_not_stop_dependent() {
        let server = MockServer::start().await;
        // "a" has no definition so it rejects without a response; "b" then
        // runs with no injection and surfaces the upstream's 400.
        Mock::given(http_method("GET"))
            .and(http_path("/v1/b"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let mut b = def("b", "/v1/b");
        b.query_params = vec![query_param_spec("plant", true)];
        b.depends_on = vec![DependencySpec {
            api_slug: "a".to_string(),
            field_mappings: vec![FieldMapping {
                source: "value[0].plant".to_string(),
                target: "plant".to_string(),
            }],
        }];

        let orch = orchestrator_for(&server, vec![b]).await;
        let result = orch
            .run(
                Uuid::nil(),
                Uuid::now_v7(),
                &[call("a"), call("b")],
                ExecutionMode::Sequential,
                None,
            )
            .await
            .unwrap();

        // "a" rejected (unknown), "b" still executed and surfaced the
        // upstream's 400 as a fulfilled call.
        assert!(!result.results[0].is_fulfilled());
        match &result.results[1] {
            CallResult::Fulfilled {
                status_code,
                injected_params,
                ..
            } => {
                assert_eq!(*status_code, 400);
                assert!(injected_params.is_empty());
            }
            other => panic!("expected fulfilled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_size_cap() {
        let server = MockServer::start().await;
        let orch = orchestrator_for(&server, vec![]).await;

        let calls: Vec<OrchestratorCall> = (0..21).map(|i| call(&format!("c{}", i))).collect();
        let err = orch
            .run(
                Uuid::nil(),
                Uuid::now_v7(),
                &calls,
                ExecutionMode::Parallel,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_dynamic_deps_merged() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(http_path("/v1/a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "A-1"}]
            })))
            .mount(&server)
            .await;
        Mock::given(http_method("GET"))
            .and(http_path("/v1/b"))
            .and(query_param("ref", "A-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut b = def("b", "/v1/b");
        b.query_params = vec![query_param_spec("ref", true)];

        let mut dynamic = HashMap::new();
        dynamic.insert(
            "b".to_string(),
            vec![DependencySpec {
                api_slug: "a".to_string(),
                field_mappings: vec![FieldMapping {
                    source: "items[0].id".to_string(),
                    target: "ref".to_string(),
                }],
            }],
        );

        let orch = orchestrator_for(&server, vec![def("a", "/v1/a"), b]).await;
        let result = orch
            .run(
                Uuid::nil(),
                Uuid::now_v7(),
                &[call("a"), call("b")],
                ExecutionMode::Sequential,
                Some(&dynamic),
            )
            .await
            .unwrap();

        assert!(result.results.iter().all(|r| r.is_fulfilled()));
        assert_eq!(result.layers.unwrap().len(), 2);
    }
}
