use crate::BrokerError;
use serde::{Deserialize, Serialize};

/// Length of a digest-derived service id.
pub const SERVICE_ID_LEN: usize = 24;

/// Release names longer than this are rejected by release managers.
pub const MAX_RELEASE_NAME_LEN: usize = 53;

const PACKAGE_SEPARATOR: char = '/';
const SERVICE_SEPARATOR: char = '.';

/// How catalog service ids are derived. One strategy per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Service id is the encoded service name; decodes without a catalog lookup.
    #[default]
    Name,
    /// Service id is the digest prefix; decoding rebuilds the catalog.
    Digest,
}

/// Service id from a chart digest: its first 24 characters.
pub fn encode_service_id(digest: &str) -> Result<String, BrokerError> {
    digest
        .get(..SERVICE_ID_LEN)
        .map(str::to_owned)
        .ok_or_else(|| {
            BrokerError::InvalidFormat(format!(
                "digest {digest:?} is shorter than {SERVICE_ID_LEN} characters"
            ))
        })
}

/// Service name from a `repo/chart` package name: every `/` becomes `.`.
pub fn encode_service_name(name: &str) -> Result<String, BrokerError> {
    if !name.contains(PACKAGE_SEPARATOR) {
        return Err(BrokerError::InvalidFormat(format!(
            "package name {name:?} has no '{PACKAGE_SEPARATOR}'"
        )));
    }
    Ok(name.replace(PACKAGE_SEPARATOR, &SERVICE_SEPARATOR.to_string()))
}

/// Package reference from a service name: every `.` becomes `/`.
pub fn decode_package_reference(service: &str) -> Result<String, BrokerError> {
    if !service.contains(SERVICE_SEPARATOR) {
        return Err(BrokerError::InvalidFormat(format!(
            "service {service:?} has no '{SERVICE_SEPARATOR}'"
        )));
    }
    Ok(service.replace(SERVICE_SEPARATOR, &PACKAGE_SEPARATOR.to_string()))
}

/// Release name for an instance: lowercase `[a-z0-9-]`, no leading or
/// trailing `-`, at most 53 characters.
pub fn release_name_for(instance_id: &str) -> Result<String, BrokerError> {
    let mapped: String = instance_id
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let mut name: String = mapped
        .trim_matches('-')
        .chars()
        .take(MAX_RELEASE_NAME_LEN)
        .collect();
    while name.ends_with('-') {
        name.pop();
    }
    if name.is_empty() {
        return Err(BrokerError::InvalidFormat(format!(
            "instance id {instance_id:?} yields no usable release name"
        )));
    }
    Ok(name)
}
