//! CloudFormation template model.
//!
//! Resources are keyed by logical id in a `BTreeMap`, so a template built
//! from the same declarations always serializes to the same bytes. Edges
//! between resources are never stored separately: they are recovered from
//! `DependsOn` and from the intrinsic functions inside each resource's
//! properties.

use crate::error::{RelayError, Result};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

pub const FORMAT_VERSION: &str = "2010-09-09";

// ---------------------------------------------------------------------------
// Intrinsic functions
// ---------------------------------------------------------------------------

pub fn ref_to(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn join(separator: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [separator, parts] })
}

pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

/// The `index`th availability zone of the deploying region.
pub fn availability_zone(index: usize) -> Value {
    json!({ "Fn::Select": [index, { "Fn::GetAZs": "" }] })
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(rename = "Properties", skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "UpdateReplacePolicy", skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
    #[serde(rename = "DeletionPolicy", skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
}

impl Resource {
    /// `properties` must be a JSON object; anything else yields no properties.
    pub fn new(resource_type: &str, properties: Value) -> Self {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
            update_replace_policy: None,
            deletion_policy: None,
        }
    }

    pub fn depends_on(mut self, logical_id: &str) -> Self {
        if !self.depends_on.iter().any(|d| d == logical_id) {
            self.depends_on.push(logical_id.to_string());
            self.depends_on.sort();
        }
        self
    }

    /// Keep the physical resource when the stack is deleted or the resource replaced.
    pub fn retain(mut self) -> Self {
        self.update_replace_policy = Some("Retain".to_string());
        self.deletion_policy = Some("Retain".to_string());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Logical ids named by `Ref`, `Fn::GetAtt` and `${..}` inside `Fn::Sub`,
    /// plus explicit `DependsOn`. Pseudo parameters (`AWS::*`) are skipped.
    pub fn referenced_ids(&self) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = self.depends_on.iter().cloned().collect();
        for value in self.properties.values() {
            collect_references(value, &mut ids);
        }
        ids
    }
}

static SUB_VAR_RE: OnceLock<Regex> = OnceLock::new();

fn sub_var_re() -> &'static Regex {
    SUB_VAR_RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9]+)(?:\.[A-Za-z0-9.]+)?\}").unwrap())
}

fn collect_references(value: &Value, ids: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get("Ref") {
                if !target.starts_with("AWS::") {
                    ids.insert(target.clone());
                }
            }
            if let Some(Value::Array(args)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(target)) = args.first() {
                    ids.insert(target.clone());
                }
            }
            match map.get("Fn::Sub") {
                Some(Value::String(s)) => collect_sub_vars(s, &Map::new(), ids),
                Some(Value::Array(args)) => {
                    let locals = match args.get(1) {
                        Some(Value::Object(m)) => m.clone(),
                        _ => Map::new(),
                    };
                    if let Some(Value::String(s)) = args.first() {
                        collect_sub_vars(s, &locals, ids);
                    }
                    for local in locals.values() {
                        collect_references(local, ids);
                    }
                }
                _ => {}
            }
            for (key, nested) in map {
                if key != "Fn::Sub" {
                    collect_references(nested, ids);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, ids);
            }
        }
        _ => {}
    }
}

fn collect_sub_vars(template: &str, locals: &Map<String, Value>, ids: &mut BTreeSet<String>) {
    for caps in sub_var_re().captures_iter(template) {
        let name = &caps[1];
        if !locals.contains_key(name) {
            ids.insert(name.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Output {
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Value")]
    pub value: Value,
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,
    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

static LOGICAL_ID_RE: OnceLock<Regex> = OnceLock::new();

fn logical_id_re() -> &'static Regex {
    LOGICAL_ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{1,255}$").unwrap())
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: description.into(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, logical_id: &str, resource: Resource) -> Result<()> {
        if !logical_id_re().is_match(logical_id) {
            return Err(RelayError::InvalidLogicalId(logical_id.to_string()));
        }
        if self.resources.contains_key(logical_id) {
            return Err(RelayError::DuplicateResource(logical_id.to_string()));
        }
        tracing::debug!(logical_id, resource_type = %resource.resource_type, "declared resource");
        self.resources.insert(logical_id.to_string(), resource);
        Ok(())
    }

    pub fn add_output(&mut self, name: &str, description: &str, value: Value) -> Result<()> {
        if !logical_id_re().is_match(name) {
            return Err(RelayError::InvalidLogicalId(name.to_string()));
        }
        self.outputs.insert(
            name.to_string(),
            Output {
                description: Some(description.to_string()),
                value,
            },
        );
        Ok(())
    }

    pub fn get(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    /// Dependency edges: logical id → ids it must be created after.
    pub fn dependencies(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.resources
            .iter()
            .map(|(id, r)| {
                let deps = r
                    .referenced_ids()
                    .into_iter()
                    .filter(|d| self.resources.contains_key(d))
                    .collect();
                (id.clone(), deps)
            })
            .collect()
    }

    /// Every reference in resources and outputs must name a declared resource.
    pub fn check_references(&self) -> Result<()> {
        for (id, resource) in &self.resources {
            for target in resource.referenced_ids() {
                if !self.resources.contains_key(&target) {
                    return Err(RelayError::UnresolvedReference {
                        from: id.clone(),
                        to: target,
                    });
                }
            }
        }
        for (name, output) in &self.outputs {
            let mut ids = BTreeSet::new();
            collect_references(&output.value, &mut ids);
            if let Some(target) = ids.into_iter().find(|t| !self.resources.contains_key(t)) {
                return Err(RelayError::UnresolvedReference {
                    from: name.clone(),
                    to: target,
                });
            }
        }
        Ok(())
    }

    /// Topological creation order. Among resources that are ready at the same
    /// time, the smaller logical id comes first.
    pub fn deployment_order(&self) -> Result<Vec<String>> {
        let deps = self.dependencies();
        let mut remaining: BTreeMap<&str, usize> = deps
            .iter()
            .map(|(id, d)| (id.as_str(), d.len()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (id, d) in &deps {
            for target in d {
                dependents.entry(target.as_str()).or_default().push(id.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(deps.len());

        while let Some(id) = ready.pop_first() {
            remaining.remove(id);
            order.push(id.to_string());
            for dependent in dependents.get(id).map(|v| v.as_slice()).unwrap_or(&[]) {
                if let Some(n) = remaining.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if !remaining.is_empty() {
            let stuck: Vec<&str> = remaining.keys().copied().collect();
            return Err(RelayError::DependencyCycle(stuck.join(", ")));
        }
        Ok(order)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
