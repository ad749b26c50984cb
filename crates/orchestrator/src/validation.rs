//! Protocol- and verb-aware validation of canonical connection definitions.
//!
//! Validation never fails; it returns a map from field name to message and
//! an empty map means the definition may be persisted and dispatched.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use common::api::{
    ConnectionControl, ConnectionDefinition, NumericField, OpcDaDefinition, OpcUaDefinition,
    Protocol,
};
use regex::Regex;

pub type FieldErrors = BTreeMap<String, String>;

pub const MAX_LABEL_LEN: usize = 30;
pub const MAX_SERVER_NAME_LEN: usize = 256;
pub const MAX_DEVICE_NAME_LEN: usize = 128;

pub const MIN_INTERVAL_SECS: f64 = 0.5;
pub const MAX_INTERVAL_SECS: f64 = 30.0;
pub const MIN_ITERATIONS: i64 = 1;
pub const MAX_ITERATIONS: i64 = 30;
pub const MIN_PORT: i64 = 1;
pub const MAX_PORT: i64 = 65_535;

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9\-_]+$").expect("label pattern compiles")
});

static DEVICE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9\-_:]+$").expect("device name pattern compiles")
});

static IPV4_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^((25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9]?[0-9])\.){3}(25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9]?[0-9])$",
    )
    .expect("ipv4 pattern compiles")
});

pub fn validate(definition: &ConnectionDefinition, control: ConnectionControl) -> FieldErrors {
    let mut errors = FieldErrors::new();

    check_device(definition, &mut errors);
    check_label("connectionName", Some(&definition.connection_name), &mut errors);

    if !control.requires_full_definition() {
        return errors;
    }

    check_label("siteName", definition.site_name.as_deref(), &mut errors);
    check_label("area", definition.area.as_deref(), &mut errors);
    check_label("process", definition.process.as_deref(), &mut errors);
    check_label("machineName", definition.machine_name.as_deref(), &mut errors);

    if !definition.destinations.any_enabled() {
        errors.insert(
            "sendDataTo".into(),
            "at least one destination must be enabled".into(),
        );
    }

    check_protocol(definition, &mut errors);

    errors
}

/// Device names accepted by onboarding: 1 to 128 characters of
/// `[a-zA-Z0-9-_:]`.
pub fn validate_device_name(name: &str) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if name.is_empty() || name.len() > MAX_DEVICE_NAME_LEN {
        errors.insert(
            "deviceName".into(),
            format!("must be between 1 and {MAX_DEVICE_NAME_LEN} characters"),
        );
    } else if !DEVICE_NAME_RE.is_match(name) {
        errors.insert(
            "deviceName".into(),
            "may only contain letters, digits, '-', '_' and ':'".into(),
        );
    }
    errors
}

pub fn is_ipv4(value: &str) -> bool {
    IPV4_RE.is_match(value)
}

fn check_device(definition: &ConnectionDefinition, errors: &mut FieldErrors) {
    let blank = definition
        .greengrass_core_device_name
        .as_deref()
        .map(|name| name.trim().is_empty())
        .unwrap_or(true);
    if blank {
        errors.insert(
            "greengrassCoreDeviceName".into(),
            "gateway device name is required".into(),
        );
    }
}

/// `None` means the label was not supplied, which is an error like a blank one.
fn check_label(field: &str, value: Option<&str>, errors: &mut FieldErrors) {
    let Some(value) = value else {
        errors.insert(field.into(), format!("{field} is required"));
        return;
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.insert(field.into(), "must not be blank".into());
    } else if trimmed.chars().count() > MAX_LABEL_LEN {
        errors.insert(
            field.into(),
            format!("must be at most {MAX_LABEL_LEN} characters"),
        );
    } else if !LABEL_RE.is_match(trimmed) {
        errors.insert(
            field.into(),
            "may only contain letters, digits, '-' and '_'".into(),
        );
    }
}

/// `protocol` names exactly one payload, and only that payload is present.
fn check_protocol(definition: &ConnectionDefinition, errors: &mut FieldErrors) {
    let (opc_da, opc_ua) = (&definition.opc_da, &definition.opc_ua);
    match (definition.protocol, opc_da, opc_ua) {
        (None, _, _) => {
            errors.insert("protocol".into(), "protocol must be OPC_DA or OPC_UA".into());
        }
        (Some(_), Some(_), Some(_)) => {
            errors.insert(
                "protocol".into(),
                "exactly one of opcDa or opcUa may be supplied".into(),
            );
        }
        (Some(Protocol::OpcDa), _, Some(_)) | (Some(Protocol::OpcUa), Some(_), _) => {
            errors.insert(
                "protocol".into(),
                "parameters do not match the declared protocol".into(),
            );
        }
        (Some(Protocol::OpcDa), Some(opc_da), None) => check_opc_da(opc_da, errors),
        (Some(Protocol::OpcUa), None, Some(opc_ua)) => check_opc_ua(opc_ua, errors),
        (Some(Protocol::OpcDa), None, None) => {
            errors.insert("opcDa".into(), "OPC DA parameters are required".into());
        }
        (Some(Protocol::OpcUa), None, None) => {
            errors.insert("opcUa".into(), "OPC UA parameters are required".into());
        }
    }
}

fn check_machine_ip(value: &str, errors: &mut FieldErrors) {
    if !is_ipv4(value.trim()) {
        errors.insert("machineIp".into(), "must be a valid IPv4 address".into());
    }
}

fn check_opc_da(opc_da: &OpcDaDefinition, errors: &mut FieldErrors) {
    match opc_da.iterations.as_ref().filter(|v| !v.is_blank()) {
        None => {
            errors.insert("iterations".into(), "iterations is required".into());
        }
        Some(iterations) => {
            let in_range = integer_value(iterations)
                .is_some_and(|v| (MIN_ITERATIONS..=MAX_ITERATIONS).contains(&v));
            if !in_range {
                errors.insert(
                    "iterations".into(),
                    format!("must be an integer between {MIN_ITERATIONS} and {MAX_ITERATIONS}"),
                );
            }
        }
    }

    match opc_da.interval.as_ref().filter(|v| !v.is_blank()) {
        None => {
            errors.insert("interval".into(), "interval is required".into());
        }
        Some(interval) => {
            let in_range = interval
                .as_f64()
                .is_some_and(|v| (MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&v));
            if !in_range {
                errors.insert(
                    "interval".into(),
                    format!("must be a number between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS}"),
                );
            }
        }
    }

    if opc_da.server_name.trim().is_empty() {
        errors.insert("serverName".into(), "server name is required".into());
    }
    check_machine_ip(&opc_da.machine_ip, errors);

    let has_tags = |tags: &Option<Vec<String>>| {
        tags.as_ref()
            .is_some_and(|tags| tags.iter().any(|tag| !tag.trim().is_empty()))
    };
    if !has_tags(&opc_da.list_tags) && !has_tags(&opc_da.tags) {
        errors.insert("tags".into(), "listTags or tags must not be empty".into());
    }
}

fn check_opc_ua(opc_ua: &OpcUaDefinition, errors: &mut FieldErrors) {
    let server_name = opc_ua.server_name.trim();
    if server_name.is_empty() {
        errors.insert("serverName".into(), "server name is required".into());
    } else if server_name.chars().count() > MAX_SERVER_NAME_LEN {
        errors.insert(
            "serverName".into(),
            format!("must be at most {MAX_SERVER_NAME_LEN} characters"),
        );
    }
    check_machine_ip(&opc_ua.machine_ip, errors);

    if let Some(port) = opc_ua.port.as_ref().filter(|v| !v.is_blank()) {
        let in_range = integer_value(port).is_some_and(|v| (MIN_PORT..=MAX_PORT).contains(&v));
        if !in_range {
            errors.insert(
                "port".into(),
                format!("must be an integer between {MIN_PORT} and {MAX_PORT}"),
            );
        }
    }
}

/// Integer value of a numeric field; fractional numbers are rejected.
fn integer_value(field: &NumericField) -> Option<i64> {
    match field {
        NumericField::Number(n) => match n.as_i64() {
            Some(v) => Some(v),
            None => n
                .as_f64()
                .filter(|v| v.fract() == 0.0 && v.abs() < 9.0e15)
                .map(|v| v as i64),
        },
        NumericField::Text(_) => field.as_integer(),
    }
}
