//! The server's own YAML configuration document. Treated as an external,
//! pure function of the CR and its resolved secrets — the shape of the
//! document itself is not part of this crate's responsibility, only that it
//! is deterministic and serializable, since the config hash depends on
//! being computed over exactly the bytes written to the ConfigMap.

use serde::Serialize;

use crate::apis::dittoserver_types::DittoServerSpec;

#[derive(Debug, Serialize)]
struct ServerConfigDocument<'a> {
    control_plane_port: i32,
    metrics_enabled: bool,
    metrics_port: i32,
    smb_enabled: bool,
    nfs_port: i32,
    s3_region: Option<&'a str>,
    s3_endpoint: Option<&'a str>,
    managed_database: bool,
}

/// Renders the server's configuration document from the CR spec. Resolved
/// secret *values* never appear in the document itself — only references to
/// where the server should read them at startup — so this function does not
/// take secret bytes as input, matching the externally-owned config schema.
pub fn render_config_document(spec: &DittoServerSpec) -> String {
    let document = ServerConfigDocument {
        control_plane_port: spec.controlPlane.effective_port(),
        metrics_enabled: spec.metrics.is_enabled(),
        metrics_port: spec.metrics.effective_port(),
        smb_enabled: spec.smb.enabled.unwrap_or(false),
        nfs_port: spec.nfs.effective_port(),
        s3_region: spec.s3.region.as_deref(),
        s3_endpoint: spec.s3.endpoint.as_deref(),
        managed_database: spec.percona.is_enabled(),
    };
    serde_yaml::to_string(&document).expect("config document always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_is_deterministic_for_fixed_spec() {
        let spec = DittoServerSpec::default();
        let a = render_config_document(&spec);
        let b = render_config_document(&spec);
        assert_eq!(a, b);
    }
}
