// Dependency auto-resolver
//
// From a set of slugs plus a flat caller context, builds a complete execution
// plan: per-call parameters, dependency edges (matching declared response
// field leaves against declared query parameters) and topologically sorted
// execution layers. Provider candidates are evaluated in slug order so the
// chosen provider is deterministic; ambiguity still produces a warning.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::{ApiDefinition, DependencySpec, FieldMapping};
use crate::error::Result;
use crate::stores::DefinitionStore;
use crate::topo;

/// Caller-supplied override: fill a parameter from a specific source call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideSource {
    pub source_slug: String,
    pub source_path: String,
}

/// One call of the resolved plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedCall {
    pub slug: String,
    pub params: HashMap<String, String>,
}

/// One topological layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExecutionLayer {
    pub layer: usize,
    pub slugs: Vec<String>,
}

/// One resolved dependency edge.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub mappings: Vec<FieldMapping>,
}

/// A required parameter nothing could satisfy.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnresolvedParam {
    pub slug: String,
    pub param: String,
}

/// Summary of one planned definition.
#[derive(Debug, Clone, Serialize)]
pub struct ApiDetail {
    pub slug: String,
    pub name: String,
    pub method: String,
    pub path: String,
}

/// Complete execution plan produced by the resolver.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPlan {
    pub calls: Vec<PlannedCall>,
    pub layers: Vec<ExecutionLayer>,
    pub dependency_edges: Vec<DependencyEdge>,
    pub warnings: Vec<String>,
    pub unresolved_params: Vec<UnresolvedParam>,
    pub api_details: Vec<ApiDetail>,
    /// Derived dependency map for the orchestrator, keyed by dependent slug.
    #[serde(skip)]
    pub dynamic_deps: HashMap<String, Vec<DependencySpec>>,
}

#[derive(Debug, Clone)]
struct Provider {
    slug: String,
    path: String,
}

/// Plans orchestrated executions from slugs and a caller context.
pub struct AutoResolver {
    definitions: Arc<dyn DefinitionStore>,
}

impl AutoResolver {
    pub fn new(definitions: Arc<dyn DefinitionStore>) -> Self {
        Self { definitions }
    }

    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        slugs: &[String],
        context: &HashMap<String, String>,
        overrides: Option<&HashMap<String, HashMap<String, OverrideSource>>>,
    ) -> Result<ResolvedPlan> {
        let mut defs = self.definitions.fetch_by_slugs(tenant_id, slugs).await?;
        // Slug order everywhere below keeps provider selection deterministic.
        defs.sort_by(|a, b| a.slug.cmp(&b.slug));

        let mut warnings: Vec<String> = slugs
            .iter()
            .filter(|s| !defs.iter().any(|d| &d.slug == *s))
            .map(|s| format!("API definition not found: {}", s))
            .collect();

        let providers = build_provider_index(&defs);

        let mut calls = Vec::new();
        let mut edges: Vec<DependencyEdge> = Vec::new();
        let mut unresolved_params = Vec::new();

        for def in &defs {
            let mut params: HashMap<String, String> = HashMap::new();

            for qp in &def.query_params {
                let override_source = overrides
                    .and_then(|o| o.get(&def.slug))
                    .and_then(|per_call| per_call.get(&qp.name));

                if let Some(src) = override_source {
                    record_edge(
                        &mut edges,
                        &src.source_slug,
                        &def.slug,
                        &src.source_path,
                        &qp.name,
                    );
                    continue;
                }

                if let Some(value) = context.get(&qp.name) {
                    params.insert(qp.name.clone(), value.clone());
                    continue;
                }

                let candidates: Vec<&Provider> = providers
                    .get(&qp.name)
                    .map(|list| list.iter().filter(|p| p.slug != def.slug).collect())
                    .unwrap_or_default();

                if let Some(chosen) = candidates.first() {
                    if candidates.len() > 1 {
                        let all: Vec<&str> =
                            candidates.iter().map(|p| p.slug.as_str()).collect();
                        warnings.push(format!(
                            "Ambiguous provider for parameter '{}' of '{}': candidates [{}], using '{}'",
                            qp.name,
                            def.slug,
                            all.join(", "),
                            chosen.slug
                        ));
                    }
                    record_edge(&mut edges, &chosen.slug, &def.slug, &chosen.path, &qp.name);
                    continue;
                }

                if qp.required {
                    unresolved_params.push(UnresolvedParam {
                        slug: def.slug.clone(),
                        param: qp.name.clone(),
                    });
                }
            }

            calls.push(PlannedCall {
                slug: def.slug.clone(),
                params,
            });
        }

        let nodes: Vec<String> = defs.iter().map(|d| d.slug.clone()).collect();
        let edge_pairs: Vec<(String, String)> = edges
            .iter()
            .map(|e| (e.from.clone(), e.to.clone()))
            .collect();
        let sorted = topo::layered_sort(&nodes, &edge_pairs);

        if !sorted.unplaced.is_empty() {
            warnings.push(format!(
                "Circular dependency detected among: {}",
                sorted.unplaced.join(", ")
            ));
        }

        let layers = sorted
            .layers
            .into_iter()
            .enumerate()
            .map(|(layer, slugs)| ExecutionLayer { layer, slugs })
            .collect();

        let mut dynamic_deps: HashMap<String, Vec<DependencySpec>> = HashMap::new();
        for edge in &edges {
            let deps = dynamic_deps.entry(edge.to.clone()).or_default();
            match deps.iter_mut().find(|d| d.api_slug == edge.from) {
                Some(dep) => dep.field_mappings.extend(edge.mappings.iter().cloned()),
                None => deps.push(DependencySpec {
                    api_slug: edge.from.clone(),
                    field_mappings: edge.mappings.clone(),
                }),
            }
        }

        let api_details = defs
            .iter()
            .map(|d| ApiDetail {
                slug: d.slug.clone(),
                name: d.name.clone(),
                method: d.method.clone(),
                path: d.path.clone(),
            })
            .collect();

        Ok(ResolvedPlan {
            calls,
            layers,
            dependency_edges: edges,
            warnings,
            unresolved_params,
            api_details,
            dynamic_deps,
        })
    }
}

/// Aggregate `leaf_name → providers` across all definitions, preserving the
/// (slug-sorted) traversal order within each candidate list.
fn build_provider_index(defs: &[ApiDefinition]) -> HashMap<String, Vec<Provider>> {
    let mut providers: HashMap<String, Vec<Provider>> = HashMap::new();
    for def in defs {
        for field in &def.response_fields {
            providers
                .entry(field.leaf_name.clone())
                .or_default()
                .push(Provider {
                    slug: def.slug.clone(),
                    path: field.path.clone(),
                });
        }
    }
    providers
}

fn record_edge(
    edges: &mut Vec<DependencyEdge>,
    from: &str,
    to: &str,
    source_path: &str,
    target_param: &str,
) {
    let mapping = FieldMapping {
        source: source_path.to_string(),
        target: target_param.to_string(),
    };
    match edges.iter_mut().find(|e| e.from == from && e.to == to) {
        Some(edge) => edge.mappings.push(mapping),
        None => edges.push(DependencyEdge {
            from: from.to_string(),
            to: to.to_string(),
            mappings: vec![mapping],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{QueryParam, ResponseField};
    use async_trait::async_trait;

    struct FakeDefinitions {
        defs: Vec<ApiDefinition>,
    }

    #[async_trait]
    impl DefinitionStore for FakeDefinitions {
        async fn fetch_by_slugs(
            &self,
            _tenant_id: Uuid,
            slugs: &[String],
        ) -> Result<Vec<ApiDefinition>> {
            Ok(self
                .defs
                .iter()
                .filter(|d| slugs.contains(&d.slug))
                .cloned()
                .collect())
        }
    }

    fn def(slug: &str, params: &[(&str, bool)], fields: &[(&str, &str)]) -> ApiDefinition {
        ApiDefinition {
            id: Uuid::now_v7(),
            tenant_id: Uuid::nil(),
            slug: slug.to_string(),
            name: slug.to_string(),
            method: "GET".to_string(),
            path: format!("/v1/{}", slug),
            query_params: params
                .iter()
                .map(|(name, required)| QueryParam {
                    name: name.to_string(),
                    param_type: None,
                    required: *required,
                    default: None,
                    example: None,
                })
                .collect(),
            request_headers: None,
            request_body: None,
            response_schema: None,
            depends_on: vec![],
            response_fields: fields
                .iter()
                .map(|(path, leaf)| ResponseField {
                    path: path.to_string(),
                    leaf_name: leaf.to_string(),
                })
                .collect(),
            tags: vec![],
            active: true,
        }
    }

    fn resolver(defs: Vec<ApiDefinition>) -> AutoResolver {
        AutoResolver::new(Arc::new(FakeDefinitions { defs }))
    }

    fn slugs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_context_satisfies_params() {
        let r = resolver(vec![def("orders", &[("plant", true)], &[])]);
        let mut context = HashMap::new();
        context.insert("plant".to_string(), "P1".to_string());

        let plan = r
            .resolve(Uuid::nil(), &slugs(&["orders"]), &context, None)
            .await
            .unwrap();

        assert_eq!(plan.calls.len(), 1);
        assert_eq!(plan.calls[0].params.get("plant").map(String::as_str), Some("P1"));
        assert!(plan.dependency_edges.is_empty());
        assert!(plan.unresolved_params.is_empty());
        assert_eq!(plan.layers.len(), 1);
    }

    #[tokio::test]
    async fn test_provider_edge_and_layers() {
        let r = resolver(vec![
            def("plants", &[], &[("value[0].plant", "plant")]),
            def("orders", &[("plant", true)], &[]),
        ]);

        let plan = r
            .resolve(Uuid::nil(), &slugs(&["plants", "orders"]), &HashMap::new(), None)
            .await
            .unwrap();

        assert_eq!(plan.dependency_edges.len(), 1);
        let edge = &plan.dependency_edges[0];
        assert_eq!(edge.from, "plants");
        assert_eq!(edge.to, "orders");
        assert_eq!(edge.mappings[0].source, "value[0].plant");
        assert_eq!(edge.mappings[0].target, "plant");

        assert_eq!(
            plan.layers,
            vec![
                ExecutionLayer { layer: 0, slugs: slugs(&["plants"]) },
                ExecutionLayer { layer: 1, slugs: slugs(&["orders"]) },
            ]
        );

        let deps = &plan.dynamic_deps["orders"];
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].api_slug, "plants");
    }

    #[tokio::test]
    async fn test_ambiguous_provider_warns_and_picks_first_by_slug() {
        // Both "alpha" and "zulu" expose the leaf "plant"; slug order picks alpha.
        let r = resolver(vec![
            def("zulu", &[], &[("data[0].plant", "plant")]),
            def("alpha", &[], &[("value[0].plant", "plant")]),
            def("orders", &[("plant", true)], &[]),
        ]);

        let plan = r
            .resolve(
                Uuid::nil(),
                &slugs(&["zulu", "orders", "alpha"]),
                &HashMap::new(),
                None,
            )
            .await
            .unwrap();

        let edge = plan
            .dependency_edges
            .iter()
            .find(|e| e.to == "orders")
            .unwrap();
        assert_eq!(edge.from, "alpha");

        let warning = plan
            .warnings
            .iter()
            .find(|w| w.contains("Ambiguous"))
            .unwrap();
        assert!(warning.contains("alpha"));
        assert!(warning.contains("zulu"));
        assert!(warning.contains("using 'alpha'"));
    }

    #[tokio::test]
    async fn test_context_beats_provider() {
        let r = resolver(vec![
            def("plants", &[], &[("value[0].plant", "plant")]),
            def("orders", &[("plant", true)], &[]),
        ]);
        let mut context = HashMap::new();
        context.insert("plant".to_string(), "P9".to_string());

        let plan = r
            .resolve(Uuid::nil(), &slugs(&["plants", "orders"]), &context, None)
            .await
            .unwrap();

        assert!(plan.dependency_edges.is_empty());
        let orders = plan.calls.iter().find(|c| c.slug == "orders").unwrap();
        assert_eq!(orders.params.get("plant").map(String::as_str), Some("P9"));
    }

    #[tokio::test]
    async fn test_override_records_explicit_edge() {
        let r = resolver(vec![
            def("plants", &[], &[("value[0].plant", "plant")]),
            def("orders", &[("plant", true)], &[]),
        ]);

        let mut per_call = HashMap::new();
        per_call.insert(
            "plant".to_string(),
            OverrideSource {
                source_slug: "plants".to_string(),
                source_path: "value[3].plant".to_string(),
            },
        );
        let mut overrides = HashMap::new();
        overrides.insert("orders".to_string(), per_call);

        let plan = r
            .resolve(
                Uuid::nil(),
                &slugs(&["plants", "orders"]),
                &HashMap::new(),
                Some(&overrides),
            )
            .await
            .unwrap();

        let edge = &plan.dependency_edges[0];
        assert_eq!(edge.from, "plants");
        assert_eq!(edge.mappings[0].source, "value[3].plant");
    }

    #[tokio::test]
    async fn test_missing_slug_warns_and_is_dropped() {
        let r = resolver(vec![def("orders", &[], &[])]);

        let plan = r
            .resolve(
                Uuid::nil(),
                &slugs(&["orders", "ghost"]),
                &HashMap::new(),
                None,
            )
            .await
            .unwrap();

        assert!(plan
            .warnings
            .contains(&"API definition not found: ghost".to_string()));
        assert_eq!(plan.calls.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_required_param() {
        let r = resolver(vec![def("orders", &[("plant", true), ("limit", false)], &[])]);

        let plan = r
            .resolve(Uuid::nil(), &slugs(&["orders"]), &HashMap::new(), None)
            .await
            .unwrap();

        assert_eq!(
            plan.unresolved_params,
            vec![UnresolvedParam {
                slug: "orders".to_string(),
                param: "plant".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_self_provider_excluded() {
        // "orders" exposes the very leaf it needs; it must not feed itself.
        let r = resolver(vec![def(
            "orders",
            &[("plant", true)],
            &[("value[0].plant", "plant")],
        )]);

        let plan = r
            .resolve(Uuid::nil(), &slugs(&["orders"]), &HashMap::new(), None)
            .await
            .unwrap();

        assert!(plan.dependency_edges.is_empty());
        assert_eq!(plan.unresolved_params.len(), 1);
    }
}
