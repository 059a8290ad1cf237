//! Caps requested job resources at the template's ceilings.

use std::collections::BTreeMap;

use crate::config::JobResources;

/// Clamp `requested` to `default`.
///
/// Every resource named in `default` appears in the result: the requested
/// quantity when it does not exceed the default, the default otherwise.
/// Requested resources the default does not name are dropped.
pub fn validate_resources(default: &JobResources, requested: Option<&JobResources>) -> JobResources {
    let Some(requested) = requested else {
        return default.clone();
    };
    JobResources {
        requests: validate_values(&default.requests, &requested.requests),
        limits: validate_values(&default.limits, &requested.limits),
    }
}

fn validate_values(
    defaults: &BTreeMap<String, String>,
    requested: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    defaults
        .iter()
        .map(|(key, default_value)| {
            let value = match requested.get(key) {
                Some(asked) if !exceeds(default_value, asked) => asked.clone(),
                _ => default_value.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// A quantity that cannot be parsed never fits under a ceiling.
fn exceeds(max: &str, requested: &str) -> bool {
    match (parse_quantity(requested), parse_quantity(max)) {
        (Some(asked), Some(max)) => asked > max,
        _ => true,
    }
}

/// Parse a quantity into a comparable number.
///
/// `250m` is milli-cpu (0.25), `512Mi` is MiB, `2Gi` is converted to MiB,
/// and a plain number is taken as is.
pub fn parse_quantity(value: &str) -> Option<f64> {
    let value = value.trim();
    if let Some(milli) = value.strip_suffix('m') {
        milli.parse::<f64>().ok().map(|v| v / 1000.0)
    } else if let Some(mib) = value.strip_suffix("Mi") {
        mib.parse::<f64>().ok()
    } else if let Some(gib) = value.strip_suffix("Gi") {
        gib.parse::<f64>().ok().map(|v| v * 1024.0)
    } else {
        value.parse::<f64>().ok()
    }
}
