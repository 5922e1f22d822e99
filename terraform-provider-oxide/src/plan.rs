//! Schema-driven planning
//!
//! Applies attribute defaults, carries prior values forward for
//! `use_state_for_unknown` attributes, and reports which changed attributes
//! force a replacement.

use crate::resources::ResourceState;
use crate::schema::{NestingMode, SchemaAttribute, SchemaBlock};
use serde_json::{Map, Value};

/// Outcome of planning one resource change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannedChange {
    pub planned_state: ResourceState,
    /// Attribute paths whose change requires destroy-then-create
    pub requires_replace: Vec<Vec<String>>,
}

/// Plan `proposed` against `prior` (absent on create)
pub fn plan_resource_change(
    block: &SchemaBlock,
    prior: Option<&ResourceState>,
    proposed: &ResourceState,
) -> PlannedChange {
    let mut planned: Map<String, Value> = proposed
        .values
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    apply_defaults(block, &mut planned);

    let mut requires_replace = Vec::new();
    if let Some(prior) = prior {
        let mut names: Vec<&String> = block.attributes.keys().collect();
        names.sort();

        for name in names {
            let attr = &block.attributes[name];
            let prior_value = prior.get(name).unwrap_or(&Value::Null);

            if attr.computed
                && attr.use_state_for_unknown
                && planned.get(name).map_or(true, Value::is_null)
                && !prior_value.is_null()
            {
                planned.insert(name.clone(), prior_value.clone());
            }

            let planned_value = planned.get(name).unwrap_or(&Value::Null);
            if attr.requires_replace && !values_equal(attr, prior_value, planned_value) {
                tracing::debug!(attribute = %name, "change requires replacement");
                requires_replace.push(vec![name.clone()]);
            }
        }
    }

    PlannedChange {
        planned_state: ResourceState {
            values: planned.into_iter().collect(),
        },
        requires_replace,
    }
}

/// Fill null attributes that declare a default, recursing into nested values
pub fn apply_defaults(block: &SchemaBlock, object: &mut Map<String, Value>) {
    for (name, attr) in &block.attributes {
        let slot = object.entry(name.clone()).or_insert(Value::Null);
        if slot.is_null() {
            if let Some(default) = &attr.default {
                *slot = default.clone();
            }
        }

        let Some(nested) = &attr.nested else {
            continue;
        };
        match (nested.nesting_mode, slot) {
            (NestingMode::Single, Value::Object(inner)) => apply_defaults(&nested.block, inner),
            (NestingMode::List | NestingMode::Set, Value::Array(items)) => {
                for item in items.iter_mut() {
                    if let Value::Object(inner) = item {
                        apply_defaults(&nested.block, inner);
                    }
                }
            }
            (NestingMode::Map, Value::Object(entries)) => {
                for item in entries.values_mut() {
                    if let Value::Object(inner) = item {
                        apply_defaults(&nested.block, inner);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Equality under the attribute's type: sets ignore element order
fn values_equal(attr: &SchemaAttribute, a: &Value, b: &Value) -> bool {
    match (attr.is_set_type(), a, b) {
        (true, Value::Array(left), Value::Array(right)) => {
            let mut left: Vec<String> = left.iter().map(Value::to_string).collect();
            let mut right: Vec<String> = right.iter().map(Value::to_string).collect();
            left.sort();
            right.sort();
            left == right
        }
        _ => a == b,
    }
}
