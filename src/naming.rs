//! Deterministic naming for every sub-object owned by a `DittoServer`, and
//! sanitization of user/server-supplied identifier fragments before they are
//! used in a DNS-safe Kubernetes name or label value.

use lazy_static::lazy_static;
use regex::Regex;

pub const APP_LABEL: &str = "app";
pub const APP_LABEL_VALUE: &str = "dittofs-server";
pub const INSTANCE_LABEL: &str = "instance";
pub const ADAPTER_TYPE_LABEL: &str = "dittofs.io/adapter-type";
pub const ADAPTER_SERVICE_MARKER: &str = "dittofs.io/adapter-service";
pub const ADAPTER_NETWORK_POLICY_MARKER: &str = "dittofs.io/adapter-network-policy";

pub fn config_map_name(cr_name: &str) -> String {
    format!("{cr_name}-config")
}

pub fn headless_service_name(cr_name: &str) -> String {
    format!("{cr_name}-headless")
}

pub fn file_service_name(cr_name: &str) -> String {
    format!("{cr_name}-file")
}

pub fn api_service_name(cr_name: &str) -> String {
    format!("{cr_name}-api")
}

pub fn metrics_service_name(cr_name: &str) -> String {
    format!("{cr_name}-metrics")
}

pub fn baseline_network_policy_name(cr_name: &str) -> String {
    format!("{cr_name}-baseline")
}

pub fn adapter_network_policy_name(cr_name: &str, sanitized_type: &str) -> String {
    format!("{cr_name}-adapter-{sanitized_type}")
}

pub fn adapter_service_name(cr_name: &str, sanitized_type: &str) -> String {
    format!("{cr_name}-adapter-{sanitized_type}")
}

pub fn jwt_secret_name(cr_name: &str) -> String {
    format!("{cr_name}-jwt-secret")
}

pub fn admin_credentials_secret_name(cr_name: &str) -> String {
    format!("{cr_name}-admin-credentials")
}

pub fn operator_credentials_secret_name(cr_name: &str) -> String {
    format!("{cr_name}-operator-credentials")
}

pub fn workload_name(cr_name: &str) -> String {
    cr_name.to_owned()
}

/// Container port name for an adapter, truncated to the Kubernetes 15-character
/// port-name limit with a deterministic 4-hex-char hash suffix on collision with
/// the limit, so that two long adapter type names never collide after truncation.
pub fn adapter_container_port_name(sanitized_type: &str) -> String {
    let preferred = format!("adapter-{sanitized_type}");
    if preferred.len() <= 15 {
        return preferred;
    }
    let hash = crc16_hex4(sanitized_type.as_bytes());
    // "adapter-" (8) + hash (4) = 12, leaving 3 chars of the type name for readability.
    let budget = 15 - 8 - 4;
    let truncated: String = sanitized_type.chars().take(budget).collect();
    format!("adapter-{truncated}{hash}")
}

/// Deterministic, non-cryptographic 4-hex-char fingerprint used only for
/// collision-avoiding name truncation, never for security purposes.
fn crc16_hex4(bytes: &[u8]) -> String {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= b as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    format!("{:04x}", crc)
}

lazy_static! {
    static ref NON_DNS_SAFE: Regex = Regex::new(r"[^a-z0-9-]+").unwrap();
    static ref DASH_RUNS: Regex = Regex::new(r"-{2,}").unwrap();
}

/// Sanitizes an adapter type string for use in a DNS-safe name or label value:
/// lowercase, non-`[a-z0-9-]` replaced with `-`, runs of `-` collapsed, trimmed,
/// empty mapped to `unknown`.
pub fn sanitize_adapter_type(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let replaced = NON_DNS_SAFE.replace_all(&lowered, "-");
    let collapsed = DASH_RUNS.replace_all(&replaced, "-");
    let trimmed = collapsed.trim_matches('-');
    if trimmed.is_empty() {
        "unknown".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_basic_passthrough() {
        assert_eq!(sanitize_adapter_type("nfs"), "nfs");
        assert_eq!(sanitize_adapter_type("SMB"), "smb");
    }

    #[test]
    fn sanitize_collapses_and_trims() {
        assert_eq!(sanitize_adapter_type("NFS v4!!"), "nfs-v4");
        assert_eq!(sanitize_adapter_type("--weird__type--"), "weird-type");
    }

    #[test]
    fn sanitize_empty_maps_to_unknown() {
        assert_eq!(sanitize_adapter_type(""), "unknown");
        assert_eq!(sanitize_adapter_type("***"), "unknown");
    }

    #[test]
    fn container_port_name_short_passthrough() {
        assert_eq!(adapter_container_port_name("nfs"), "adapter-nfs");
        assert_eq!(adapter_container_port_name("smb"), "adapter-smb");
    }

    #[test]
    fn container_port_name_truncates_long_types_deterministically() {
        let name = adapter_container_port_name("a-very-long-adapter-type-name");
        assert!(name.len() <= 15);
        assert!(name.starts_with("adapter-"));
        // deterministic: same input, same output
        assert_eq!(name, adapter_container_port_name("a-very-long-adapter-type-name"));
    }

    #[test]
    fn container_port_name_truncation_avoids_collision_for_distinct_prefixes() {
        let a = adapter_container_port_name("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let b = adapter_container_port_name("aaaaaaaaaaaaaaaaaaaaaaaaaaaaab");
        assert_ne!(a, b);
    }
}
