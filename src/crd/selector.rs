//! Label selector helpers
//!
//! Renders a `LabelSelector` into the query string the API server expects and
//! evaluates it locally against a label map (used when mapping PVC events to
//! group intents and by the in-memory store).

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;

/// Render a selector as a label query (`app=db,tier in (a,b),!legacy`)
pub fn to_query(selector: &LabelSelector) -> Result<String> {
    let mut terms = Vec::new();

    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            terms.push(format!("{}={}", key, value));
        }
    }

    for requirement in selector.match_expressions.iter().flatten() {
        terms.push(requirement_to_query(requirement)?);
    }

    Ok(terms.join(","))
}

fn requirement_to_query(requirement: &LabelSelectorRequirement) -> Result<String> {
    let values = requirement.values.clone().unwrap_or_default();
    match requirement.operator.as_str() {
        "In" | "NotIn" if values.is_empty() => Err(Error::InvalidSelector(format!(
            "operator {} on key {} requires values",
            requirement.operator, requirement.key
        ))),
        "In" => Ok(format!("{} in ({})", requirement.key, values.join(","))),
        "NotIn" => Ok(format!("{} notin ({})", requirement.key, values.join(","))),
        "Exists" => Ok(requirement.key.clone()),
        "DoesNotExist" => Ok(format!("!{}", requirement.key)),
        other => Err(Error::InvalidSelector(format!(
            "unsupported operator {} on key {}",
            other, requirement.key
        ))),
    }
}

/// Evaluate a selector against a label map.
///
/// An empty selector matches everything, as it does on the API server.
pub fn matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> Result<bool> {
    if let Some(expected) = &selector.match_labels {
        for (key, value) in expected {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }
    }

    for requirement in selector.match_expressions.iter().flatten() {
        let values = requirement.values.as_deref().unwrap_or_default();
        let actual = labels.get(&requirement.key);
        let ok = match requirement.operator.as_str() {
            "In" | "NotIn" if values.is_empty() => {
                return Err(Error::InvalidSelector(format!(
                    "operator {} on key {} requires values",
                    requirement.operator, requirement.key
                )))
            }
            "In" => actual.map(|v| values.contains(v)).unwrap_or(false),
            "NotIn" => actual.map(|v| !values.contains(v)).unwrap_or(true),
            "Exists" => actual.is_some(),
            "DoesNotExist" => actual.is_none(),
            other => {
                return Err(Error::InvalidSelector(format!(
                    "unsupported operator {} on key {}",
                    other, requirement.key
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }

    Ok(true)
}
