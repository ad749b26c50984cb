//! Canonicalization of operator-submitted connection definitions.
//!
//! [`build`] never fails: anything it cannot normalize is passed through for
//! the validator to report, including a payload that disagrees with
//! `protocol`. It is idempotent, `build(build(x)) == build(x)`.

use common::api::{ConnectionDefinition, NumericField, OpcDaDefinition, OpcUaDefinition};

pub fn build(raw: ConnectionDefinition) -> ConnectionDefinition {
    ConnectionDefinition {
        connection_name: raw.connection_name.trim().to_string(),
        protocol: raw.protocol,
        greengrass_core_device_name: trim_opt(raw.greengrass_core_device_name),
        site_name: trim_opt(raw.site_name),
        area: trim_opt(raw.area),
        process: trim_opt(raw.process),
        machine_name: trim_opt(raw.machine_name),
        opc_da: raw.opc_da.map(build_opc_da),
        opc_ua: raw.opc_ua.map(build_opc_ua),
        destinations: raw.destinations,
    }
}

fn build_opc_da(raw: OpcDaDefinition) -> OpcDaDefinition {
    OpcDaDefinition {
        machine_ip: raw.machine_ip.trim().to_string(),
        server_name: raw.server_name.trim().to_string(),
        interval: normalize_numeric(raw.interval),
        iterations: normalize_numeric(raw.iterations),
        list_tags: normalize_tags(raw.list_tags),
        tags: normalize_tags(raw.tags),
    }
}

fn build_opc_ua(raw: OpcUaDefinition) -> OpcUaDefinition {
    OpcUaDefinition {
        machine_ip: raw.machine_ip.trim().to_string(),
        server_name: raw.server_name.trim().to_string(),
        port: normalize_numeric(raw.port),
    }
}

fn trim_opt(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

/// Text that parses becomes a number; blank text is dropped rather than
/// coerced to zero; anything else is kept as trimmed text.
pub fn normalize_numeric(value: Option<NumericField>) -> Option<NumericField> {
    match value? {
        NumericField::Number(n) => Some(NumericField::Number(n)),
        NumericField::Text(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            if let Ok(int) = trimmed.parse::<i64>() {
                return Some(NumericField::Number(int.into()));
            }
            let number = trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64);
            Some(match number {
                Some(n) => NumericField::Number(n),
                None => NumericField::Text(trimmed.to_string()),
            })
        }
    }
}

fn normalize_tags(tags: Option<Vec<String>>) -> Option<Vec<String>> {
    let cleaned: Vec<String> = tags?
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
