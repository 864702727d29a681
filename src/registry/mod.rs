use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::AccessMode;
use crate::tools::{self, Tool};

// -----------------------------------------------------------------------------
// ----- Capability ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Write,
}

impl Capability {
    pub fn visible_in(self, mode: AccessMode) -> bool {
        match self {
            Capability::Read => true,
            Capability::Write => mode == AccessMode::FullAccess,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ParamSpec -------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ToolDescriptor --------------------------------------------------------

/// Static description of one operation plus the handler it maps to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub capability: Capability,
    #[serde(rename = "parameters")]
    pub params: &'static [ParamSpec],
    pub takes_query_text: bool,
    #[serde(skip)]
    pub tool: Tool,
}

impl ToolDescriptor {
    /// Required parameters must be present and non-null; present parameters
    /// must match their declared kind. Unknown parameters are ignored.
    pub fn check_arguments(&self, args: &Map<String, Value>) -> Result<(), String> {
        for spec in self.params {
            match args.get(spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(format!("missing required parameter '{}'", spec.name));
                }
                Some(value) if !value.is_null() && !spec.kind.accepts(value) => {
                    return Err(format!(
                        "parameter '{}' must be of type {}",
                        spec.name,
                        spec.kind.as_str()
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Registry --------------------------------------------------------------

/// Immutable operation catalog. Write operations are hidden in read-only mode.
#[derive(Debug)]
pub struct Registry {
    tools: Vec<ToolDescriptor>,
    by_name: HashMap<&'static str, usize>,
}

// -----------------------------------------------------------------------------
// ----- Registry: Static ------------------------------------------------------

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Every read operation followed by every write operation.
    pub fn standard() -> Result<Registry, RegistryError> {
        let mut builder = Registry::builder();
        for descriptor in tools::read_set().into_iter().chain(tools::write_set()) {
            builder = builder.register(descriptor)?;
        }
        Ok(builder.build())
    }
}

// -----------------------------------------------------------------------------
// ----- Registry: Public ------------------------------------------------------

impl Registry {
    pub fn lookup(&self, name: &str, mode: AccessMode) -> Option<&ToolDescriptor> {
        let idx = *self.by_name.get(name)?;
        let descriptor = &self.tools[idx];
        descriptor.capability.visible_in(mode).then_some(descriptor)
    }

    pub fn list(&self, mode: AccessMode) -> Vec<&ToolDescriptor> {
        self.tools
            .iter()
            .filter(|d| d.capability.visible_in(mode))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// -----------------------------------------------------------------------------
// ----- RegistryBuilder -------------------------------------------------------

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    tools: Vec<ToolDescriptor>,
    by_name: HashMap<&'static str, usize>,
}

impl RegistryBuilder {
    pub fn register(mut self, descriptor: ToolDescriptor) -> Result<Self, RegistryError> {
        if self.by_name.contains_key(descriptor.name) {
            return Err(RegistryError::Duplicate {
                name: descriptor.name.to_string(),
            });
        }
        self.by_name.insert(descriptor.name, self.tools.len());
        self.tools.push(descriptor);
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            tools: self.tools,
            by_name: self.by_name,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("operation '{name}' registered twice")]
    Duplicate { name: String },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PARAMS: &[ParamSpec] = &[
        ParamSpec::required("table_name", ParamKind::String, "Table"),
        ParamSpec::optional("limit", ParamKind::Integer, "Row cap"),
    ];

    fn descriptor(name: &'static str, capability: Capability) -> ToolDescriptor {
        ToolDescriptor {
            name,
            description: "test",
            capability,
            params: PARAMS,
            takes_query_text: false,
            tool: Tool::ListTables,
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Registry::builder()
            .register(descriptor("a", Capability::Read))
            .unwrap()
            .register(descriptor("a", Capability::Write))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { name } if name == "a"));
    }

    #[test]
    fn write_tools_hidden_in_read_only() {
        let registry = Registry::builder()
            .register(descriptor("r", Capability::Read))
            .unwrap()
            .register(descriptor("w", Capability::Write))
            .unwrap()
            .build();

        assert!(registry.lookup("r", AccessMode::ReadOnly).is_some());
        assert!(registry.lookup("w", AccessMode::ReadOnly).is_none());
        assert!(registry.lookup("w", AccessMode::FullAccess).is_some());
        assert!(registry.lookup("missing", AccessMode::FullAccess).is_none());
        assert_eq!(registry.list(AccessMode::ReadOnly).len(), 1);
        assert_eq!(registry.list(AccessMode::FullAccess).len(), 2);
    }

    #[test]
    fn argument_shape_is_checked() {
        let d = descriptor("t", Capability::Read);
        assert!(d.check_arguments(&args(json!({"table_name": "users"}))).is_ok());
        assert!(d.check_arguments(&args(json!({"table_name": "users", "limit": null}))).is_ok());
        assert!(d.check_arguments(&args(json!({"table_name": "users", "extra": 1}))).is_ok());

        let missing = d.check_arguments(&args(json!({}))).unwrap_err();
        assert_eq!(missing, "missing required parameter 'table_name'");

        let null = d.check_arguments(&args(json!({"table_name": null}))).unwrap_err();
        assert_eq!(null, "missing required parameter 'table_name'");

        let wrong = d
            .check_arguments(&args(json!({"table_name": "users", "limit": "ten"})))
            .unwrap_err();
        assert_eq!(wrong, "parameter 'limit' must be of type integer");
    }

    #[test]
    fn standard_catalog_splits_read_and_write() {
        let registry = Registry::standard().unwrap();
        let read_only: Vec<_> = registry
            .list(AccessMode::ReadOnly)
            .iter()
            .map(|d| d.name)
            .collect();

        assert!(read_only.contains(&"execute_select"));
        assert!(read_only.contains(&"list_tables"));
        assert!(!read_only.contains(&"execute_query"));
        assert!(!read_only.contains(&"delete_data"));
        assert_eq!(registry.list(AccessMode::FullAccess).len(), registry.len());
    }

    #[test]
    fn descriptors_serialize_for_listing() {
        let json = serde_json::to_value(descriptor("t", Capability::Write)).unwrap();
        assert_eq!(json["name"], "t");
        assert_eq!(json["capability"], "write");
        assert_eq!(json["takesQueryText"], false);
        assert_eq!(json["parameters"][0]["name"], "table_name");
        assert_eq!(json["parameters"][0]["kind"], "string");
        assert!(json.get("tool").is_none());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
