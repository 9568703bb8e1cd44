// Dot/bracket path extraction over JSON trees
//
// The dependency dialect: a path is a dot-separated sequence of field names,
// each optionally followed by index selectors. `[N]` selects index N of an
// array and an empty `[]` selects index 0. Examples: `value[0].plant`,
// `value[].material`, `resources.list[3].name`. Missing segments yield None.

use serde_json::Value;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Field(String),
    Index(usize),
}

/// Parse a path into its step list. Returns `None` for paths that cannot be
/// parsed (unterminated brackets, non-numeric indices); extraction treats
/// those the same as a missing value.
pub fn parse_path(path: &str) -> Option<Vec<Step>> {
    let mut steps = Vec::new();

    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }

        let mut rest = segment;
        if let Some(bracket) = rest.find('[') {
            let (name, brackets) = rest.split_at(bracket);
            if !name.is_empty() {
                steps.push(Step::Field(name.to_string()));
            }
            rest = brackets;
            while !rest.is_empty() {
                if !rest.starts_with('[') {
                    return None;
                }
                let close = rest.find(']')?;
                let inner = &rest[1..close];
                let index = if inner.is_empty() {
                    0
                } else {
                    inner.parse::<usize>().ok()?
                };
                steps.push(Step::Index(index));
                rest = &rest[close + 1..];
            }
        } else {
            steps.push(Step::Field(rest.to_string()));
        }
    }

    Some(steps)
}

/// Extract the value at `path` from `root`, or `None` when any step misses.
pub fn extract<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let steps = parse_path(path)?;
    let mut current = root;
    for step in &steps {
        current = match step {
            Step::Field(name) => current.as_object()?.get(name)?,
            Step::Index(i) => current.as_array()?.get(*i)?,
        };
    }
    Some(current)
}

/// Extract and stringify for parameter injection. Strings inject verbatim;
/// other scalars and composites inject their compact JSON form.
pub fn extract_as_string(root: &Value, path: &str) -> Option<String> {
    match extract(root, path)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
