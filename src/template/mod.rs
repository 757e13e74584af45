//! Declarative CloudFormation template model.
//!
//! Resources are opaque to this module: it only knows their type name, a JSON
//! property bag, and the edges between them. Edges come from two places:
//! explicit `DependsOn` declarations and the intrinsic references
//! (`Ref`, `Fn::GetAtt`, `Fn::Sub`) found in properties. See [`graph`].

pub mod graph;
pub mod intrinsic;

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;

pub const FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Invalid logical id '{0}': must be 1-255 ASCII alphanumeric characters")]
    InvalidLogicalId(String),

    #[error("Duplicate logical id '{0}'")]
    DuplicateLogicalId(String),

    #[error("Properties of '{0}' must be a JSON object")]
    InvalidProperties(String),

    #[error("'{from}' refers to '{to}', which is not declared in the template")]
    DanglingReference { from: String, to: String },

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Failed to render template: {0}")]
    Render(String),
}

/// Template-local resource name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    pub fn new(id: impl Into<String>) -> Result<Self, TemplateError> {
        let id = id.into();
        if id.is_empty() || id.len() > 255 || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TemplateError::InvalidLogicalId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
}

/// A single resource declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<LogicalId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub properties: Value,
}

impl Resource {
    pub fn new(type_name: impl Into<String>, properties: Value) -> Self {
        Self {
            type_name: type_name.into(),
            depends_on: Vec::new(),
            deletion_policy: None,
            properties,
        }
    }

    /// Declare an explicit ordering edge to `other`.
    ///
    /// Needed whenever the resource relies on `other` without referencing any
    /// of its attributes.
    pub fn depends_on(mut self, other: &LogicalId) -> Self {
        if !self.depends_on.contains(other) {
            self.depends_on.push(other.clone());
        }
        self
    }

    pub fn deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self
    }

    /// Property value by name, `None` when absent
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// Stack output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<Value>,
}

impl Output {
    pub fn new(value: Value) -> Self {
        Self {
            description: None,
            value,
            export: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn export(mut self, name: Value) -> Self {
        self.export = Some(json!({ "Name": name }));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    #[default]
    Json,
    Yaml,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
        }
    }
}

/// An ordered set of resources and outputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    description: Option<String>,
    resources: Vec<(LogicalId, Resource)>,
    outputs: Vec<(LogicalId, Output)>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }

    /// Declare a resource, returning its logical id for later references
    pub fn add(&mut self, id: &str, resource: Resource) -> Result<LogicalId, TemplateError> {
        let id = LogicalId::new(id)?;
        if self.contains(&id) {
            return Err(TemplateError::DuplicateLogicalId(id.0));
        }
        if !(resource.properties.is_object() || resource.properties.is_null()) {
            return Err(TemplateError::InvalidProperties(id.0));
        }

        tracing::debug!(logical_id = %id, type_name = %resource.type_name, "Declared resource");
        self.resources.push((id.clone(), resource));
        Ok(id)
    }

    pub fn add_output(&mut self, id: &str, output: Output) -> Result<(), TemplateError> {
        let id = LogicalId::new(id)?;
        if self.outputs.iter().any(|(existing, _)| *existing == id) {
            return Err(TemplateError::DuplicateLogicalId(id.0));
        }
        self.outputs.push((id, output));
        Ok(())
    }

    pub fn contains(&self, id: &LogicalId) -> bool {
        self.resources.iter().any(|(existing, _)| existing == id)
    }

    pub fn get(&self, id: &LogicalId) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, resource)| resource)
    }

    /// Resources in declaration order
    pub fn resources(&self) -> impl Iterator<Item = (&LogicalId, &Resource)> {
        self.resources.iter().map(|(id, resource)| (id, resource))
    }

    /// Resources of one CloudFormation type, in declaration order
    pub fn resources_of_type<'a>(
        &'a self,
        type_name: &'a str,
    ) -> impl Iterator<Item = (&'a LogicalId, &'a Resource)> + 'a {
        self.resources()
            .filter(move |(_, resource)| resource.type_name == type_name)
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&LogicalId, &Output)> {
        self.outputs.iter().map(|(id, output)| (id, output))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn to_value(&self) -> Result<Value, TemplateError> {
        let mut root = Map::new();
        root.insert("AWSTemplateFormatVersion".into(), json!(FORMAT_VERSION));
        if let Some(description) = &self.description {
            root.insert("Description".into(), json!(description));
        }

        let mut resources = Map::new();
        for (id, resource) in &self.resources {
            let value = serde_json::to_value(resource)
                .map_err(|e| TemplateError::Render(format!("resource '{}': {}", id, e)))?;
            resources.insert(id.to_string(), value);
        }
        root.insert("Resources".into(), Value::Object(resources));

        if !self.outputs.is_empty() {
            let mut outputs = Map::new();
            for (id, output) in &self.outputs {
                let value = serde_json::to_value(output)
                    .map_err(|e| TemplateError::Render(format!("output '{}': {}", id, e)))?;
                outputs.insert(id.to_string(), value);
            }
            root.insert("Outputs".into(), Value::Object(outputs));
        }

        Ok(Value::Object(root))
    }

    /// Validate the graph and render it in `format`.
    ///
    /// Rendering happens entirely in memory, so a failure never leaves a
    /// partial template behind.
    pub fn render(&self, format: Format) -> Result<String, TemplateError> {
        self.validate()?;
        let value = self.to_value()?;
        match format {
            Format::Json => serde_json::to_string_pretty(&value)
                .map(|mut s| {
                    s.push('\n');
                    s
                })
                .map_err(|e| TemplateError::Render(e.to_string())),
            Format::Yaml => {
                serde_yaml::to_string(&value).map_err(|e| TemplateError::Render(e.to_string()))
            }
        }
    }
}
