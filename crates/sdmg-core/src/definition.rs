// API definition domain types
//
// An ApiDefinition is the declarative description of one upstream operation:
// method, path template, query parameters, declared response field leaves and
// dependencies on other definitions. These are the units the auto-resolver
// plans over and the orchestrator executes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A declared query parameter of an API definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    /// Declared value type (informational only)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

/// One source→target path mapping inside a dependency declaration.
///
/// `source` is a dot/bracket path into the provider's response body
/// (see `json_path`); `target` is the name of the dependent call's
/// query parameter to fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

/// Declared dependency of one definition on another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySpec {
    pub api_slug: String,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
}

/// One flattened leaf of a definition's response schema.
///
/// `path` is the full dot/bracket path to the leaf; `leaf_name` is the final
/// field name extracted from it, used to match against query parameter names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseField {
    pub path: String,
    pub leaf_name: String,
}

/// A named upstream operation, unique per tenant by `slug`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDefinition {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub slug: String,
    pub name: String,
    /// HTTP method, uppercase
    pub method: String,
    /// Path template, may contain `{name}` placeholders
    pub path: String,
    #[serde(default)]
    pub query_params: Vec<QueryParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub depends_on: Vec<DependencySpec>,
    #[serde(default)]
    pub response_fields: Vec<ResponseField>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub active: bool,
}

impl ApiDefinition {
    /// Dependencies with self-references removed. A definition may never
    /// depend on its own slug; stored data violating that is ignored here.
    pub fn foreign_dependencies(&self) -> impl Iterator<Item = &DependencySpec> {
        self.depends_on.iter().filter(|d| d.api_slug != self.slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(slug: &str, deps: Vec<DependencySpec>) -> ApiDefinition {
        ApiDefinition {
            id: Uuid::nil(),
            tenant_id: Uuid::nil(),
            slug: slug.to_string(),
            name: slug.to_string(),
            method: "GET".to_string(),
            path: "/x".to_string(),
            query_params: vec![],
            request_headers: None,
            request_body: None,
            response_schema: None,
            depends_on: deps,
            response_fields: vec![],
            tags: vec![],
            active: true,
        }
    }

    #[test]
    fn test_self_dependency_filtered() {
        let d = def(
            "orders",
            vec![
                DependencySpec {
                    api_slug: "orders".to_string(),
                    field_mappings: vec![],
                },
                DependencySpec {
                    api_slug: "plants".to_string(),
                    field_mappings: vec![],
                },
            ],
        );

        let foreign: Vec<_> = d.foreign_dependencies().collect();
        assert_eq!(foreign.len(), 1);
        assert_eq!(foreign[0].api_slug, "plants");
    }

    #[test]
    fn test_query_param_type_field_roundtrip() {
        let json = r#"{"name":"plant","type":"string","required":true}"#;
        let qp: QueryParam = serde_json::from_str(json).unwrap();
        assert_eq!(qp.param_type.as_deref(), Some("string"));
        assert!(qp.required);

        let back = serde_json::to_value(&qp).unwrap();
        assert_eq!(back["type"], "string");
    }
}
