//! Static tool argument schemas: required-argument checks, alias
//! resolution, and default injection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{GateError, GateResult};

/// Declared interface of one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    /// Arguments that must be present after alias and default resolution.
    #[serde(default)]
    pub required: Vec<String>,
    /// Accepted alternative names, e.g. `language → runtime`.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Values injected when the argument is absent.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: Vec::new(),
            aliases: BTreeMap::new(),
            defaults: BTreeMap::new(),
        }
    }

    pub fn required(mut self, arg: impl Into<String>) -> Self {
        self.required.push(arg.into());
        self
    }

    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.insert(from.into(), to.into());
        self
    }

    pub fn default(mut self, arg: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(arg.into(), value.into());
        self
    }
}

/// All known tool schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, ToolSchema>,
}

impl SchemaRegistry {
    pub fn register(&mut self, schema: ToolSchema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&ToolSchema> {
        self.schemas.get(name)
    }

    /// Validate and normalize arguments for a tool.
    ///
    /// Aliased keys are renamed (the canonical key wins if both appear),
    /// defaults fill gaps, and any still-missing required argument is an
    /// error the gate converts to a synthetic `syntax` failure.
    pub fn validate(
        &self,
        tool_name: &str,
        args: &BTreeMap<String, String>,
    ) -> GateResult<BTreeMap<String, String>> {
        let schema = self.schemas.get(tool_name).ok_or_else(|| GateError::UnknownTool {
            name: tool_name.to_string(),
        })?;

        let mut resolved: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in args {
            let canonical = schema.aliases.get(key).unwrap_or(key);
            resolved.entry(canonical.clone()).or_insert_with(|| value.clone());
        }
        // Canonical keys provided directly always win over aliased ones.
        for (key, value) in args {
            if !schema.aliases.contains_key(key) {
                resolved.insert(key.clone(), value.clone());
            }
        }

        for (arg, value) in &schema.defaults {
            resolved.entry(arg.clone()).or_insert_with(|| value.clone());
        }

        for required in &schema.required {
            if !resolved.contains_key(required) {
                return Err(GateError::MissingArgument {
                    tool: tool_name.to_string(),
                    argument: required.clone(),
                });
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        let mut r = SchemaRegistry::default();
        r.register(
            ToolSchema::new("code_execution_tool")
                .required("runtime")
                .alias("language", "runtime")
                .default("session", "0"),
        );
        r
    }

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_beats_alias() {
        let r = registry();
        let out = r
            .validate(
                "code_execution_tool",
                &args(&[("language", "python"), ("runtime", "node")]),
            )
            .unwrap();
        assert_eq!(out.get("runtime").map(String::as_str), Some("node"));
    }

    #[test]
    fn missing_required_errors() {
        let r = registry();
        let err = r.validate("code_execution_tool", &args(&[])).unwrap_err();
        assert!(matches!(err, GateError::MissingArgument { .. }));
    }

    #[test]
    fn defaults_do_not_override() {
        let r = registry();
        let out = r
            .validate(
                "code_execution_tool",
                &args(&[("runtime", "python"), ("session", "7")]),
            )
            .unwrap();
        assert_eq!(out.get("session").map(String::as_str), Some("7"));
    }
}
