use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::ClientError;

/// Characters percent-encoded inside a rendered path segment.
///
/// `/` is included so a parameter value never splits into extra path
/// segments; `%` so already-encoded input is not double-decoded server-side.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Metadata for one management API endpoint.
#[derive(Clone, Copy, Debug)]
pub struct EndpointDefinition {
    /// Stable operation identifier.
    pub operation_id: &'static str,
    /// Uppercase HTTP method (for example `GET`, `POST`).
    pub method: &'static str,
    /// Path template, potentially containing `{param}` placeholders.
    pub path_template: &'static str,
    /// Required path parameter names extracted from `path_template`.
    pub path_params: &'static [&'static str],
}

/// Version prefix shared by every management endpoint.
pub const API_PREFIX: &str = "/mgmt/v1.2/rest";

/// TCP port the appliance management API listens on by default.
pub const DEFAULT_PORT: u16 = 8443;

macro_rules! endpoint {
    ($id:literal, $method:literal, $path:literal) => {
        EndpointDefinition {
            operation_id: $id,
            method: $method,
            path_template: concat!("/mgmt/v1.2/rest", $path),
            path_params: &[],
        }
    };
    ($id:literal, $method:literal, $path:literal, [$($param:literal),+]) => {
        EndpointDefinition {
            operation_id: $id,
            method: $method,
            path_template: concat!("/mgmt/v1.2/rest", $path),
            path_params: &[$($param),+],
        }
    };
}

/// Endpoint catalog for the Anvil management API.
///
/// The appliance publishes no machine-readable API document, so this table
/// is maintained by hand from the vendor's endpoint list.
pub const ENDPOINTS: &[EndpointDefinition] = &[
    endpoint!("login", "POST", "/login"),
    endpoint!("listNodes", "GET", "/nodes"),
    endpoint!("getNode", "GET", "/nodes/{node_id}", ["node_id"]),
    endpoint!("deleteNode", "DELETE", "/nodes/{node_id}", ["node_id"]),
    endpoint!("listSites", "GET", "/sites"),
    endpoint!("getSite", "GET", "/sites/{site_id}", ["site_id"]),
    endpoint!("listShares", "GET", "/shares"),
    endpoint!("getShare", "GET", "/shares/{share_id}", ["share_id"]),
    endpoint!("createShare", "POST", "/shares"),
    endpoint!("updateShare", "PUT", "/shares/{share_id}", ["share_id"]),
    endpoint!("deleteShare", "DELETE", "/shares/{share_id}", ["share_id"]),
    endpoint!("listShareSnapshots", "GET", "/share-snapshots"),
    endpoint!(
        "createShareSnapshot",
        "POST",
        "/share-snapshots/{share_id}",
        ["share_id"]
    ),
    endpoint!("listStorageVolumes", "GET", "/storage-volumes"),
    endpoint!(
        "getStorageVolume",
        "GET",
        "/storage-volumes/{volume_id}",
        ["volume_id"]
    ),
    endpoint!("createStorageVolume", "POST", "/storage-volumes"),
    endpoint!(
        "deleteStorageVolume",
        "DELETE",
        "/storage-volumes/{volume_id}",
        ["volume_id"]
    ),
    endpoint!("listLogicalVolumes", "GET", "/logical-volumes"),
    endpoint!("listVolumeGroups", "GET", "/volume-groups"),
    endpoint!(
        "getVolumeGroup",
        "GET",
        "/volume-groups/{group_id}",
        ["group_id"]
    ),
    endpoint!("listObjectives", "GET", "/objectives"),
    endpoint!(
        "getObjective",
        "GET",
        "/objectives/{objective_id}",
        ["objective_id"]
    ),
    endpoint!("createObjective", "POST", "/objectives"),
    endpoint!("listTasks", "GET", "/tasks"),
    endpoint!("getTask", "GET", "/tasks/{task_id}", ["task_id"]),
    endpoint!("getAdConfiguration", "GET", "/ad"),
    endpoint!("discoverAdRealm", "GET", "/ad/discover/{domain}", ["domain"]),
    endpoint!("flushAdCache", "POST", "/ad/flush_cache"),
    endpoint!("getAd", "GET", "/ad/{ad_id}", ["ad_id"]),
    endpoint!("updateAd", "PUT", "/ad/{ad_id}", ["ad_id"]),
    endpoint!("listBackupSchedules", "GET", "/backup"),
    endpoint!("createBackupSchedule", "POST", "/backup"),
    endpoint!(
        "createImmediateBackup",
        "POST",
        "/backup/backup-create/{volume_ip}/{export_path}",
        ["volume_ip", "export_path"]
    ),
    endpoint!(
        "listAllBackups",
        "GET",
        "/backup/backup-list/{volume_ip}/{export_path}",
        ["volume_ip", "export_path"]
    ),
    endpoint!(
        "restoreLatestBackup",
        "POST",
        "/backup/backup-restore/{volume_ip}/{export_path}",
        ["volume_ip", "export_path"]
    ),
    endpoint!(
        "restoreNamedBackup",
        "POST",
        "/backup/backup-restore/{volume_ip}/{export_path}/{backup_name}",
        ["volume_ip", "export_path", "backup_name"]
    ),
    endpoint!(
        "updateBackupSchedule",
        "PUT",
        "/backup/{backup_id}",
        ["backup_id"]
    ),
    endpoint!(
        "deleteBackupSchedule",
        "DELETE",
        "/backup/{backup_id}",
        ["backup_id"]
    ),
    endpoint!("listClusterInfo", "GET", "/cntl"),
    endpoint!("acceptEula", "POST", "/cntl/accept-eula"),
    endpoint!("shutdownCluster", "POST", "/cntl/shutdown"),
    endpoint!("getClusterState", "GET", "/cntl/state"),
    endpoint!("getClusterInfo", "GET", "/cntl/{cluster_id}", ["cluster_id"]),
    endpoint!("updateCluster", "PUT", "/cntl/{cluster_id}", ["cluster_id"]),
    endpoint!("listDiskDrives", "GET", "/disk-drives"),
    endpoint!("getDiskDrive", "GET", "/disk-drives/{drive_id}", ["drive_id"]),
    endpoint!("listDnsConfigs", "GET", "/dnss"),
    endpoint!("getDnsConfig", "GET", "/dnss/{dns_id}", ["dns_id"]),
    endpoint!("updateDnsConfig", "PUT", "/dnss/{dns_id}", ["dns_id"]),
    endpoint!("listFileSnapshotSchedules", "GET", "/file-snapshots"),
    endpoint!("createFileSnapshotSchedule", "POST", "/file-snapshots"),
    endpoint!("createFileSnapshot", "POST", "/file-snapshots/create"),
    endpoint!("deleteFileSnapshot", "POST", "/file-snapshots/delete"),
    endpoint!("listSnapshotsForFile", "GET", "/file-snapshots/list"),
    endpoint!("restoreFileFromSnapshot", "POST", "/file-snapshots/restore"),
    endpoint!(
        "cloneFileSnapshot",
        "POST",
        "/file-snapshots/{file_source}/{file_destination}",
        ["file_source", "file_destination"]
    ),
    endpoint!(
        "getFileSnapshot",
        "GET",
        "/file-snapshots/{snapshot_id}",
        ["snapshot_id"]
    ),
    endpoint!(
        "updateFileSnapshotSchedule",
        "PUT",
        "/file-snapshots/{snapshot_id}",
        ["snapshot_id"]
    ),
    endpoint!(
        "deleteFileSnapshotSchedule",
        "DELETE",
        "/file-snapshots/{snapshot_id}",
        ["snapshot_id"]
    ),
    endpoint!("listGateways", "GET", "/gateways"),
    endpoint!("getGatewayForNode", "GET", "/gateways/{node}", ["node"]),
    endpoint!(
        "updateGateway",
        "PUT",
        "/gateways/{gateway_id}",
        ["gateway_id"]
    ),
    endpoint!("listNetworkInterfaces", "GET", "/network-interfaces"),
    endpoint!("resolveNetworkInterface", "GET", "/network-interfaces/resolve"),
    endpoint!(
        "getNetworkInterface",
        "GET",
        "/network-interfaces/{interface_id}",
        ["interface_id"]
    ),
    endpoint!(
        "createVirtualNetworkInterface",
        "POST",
        "/network-interfaces/{interface_id}",
        ["interface_id"]
    ),
    endpoint!(
        "updateNetworkInterface",
        "PUT",
        "/network-interfaces/{interface_id}",
        ["interface_id"]
    ),
    endpoint!(
        "deleteNetworkInterface",
        "DELETE",
        "/network-interfaces/{interface_id}",
        ["interface_id"]
    ),
    endpoint!("listNtpConfigs", "GET", "/ntps"),
    endpoint!("getNtpConfig", "GET", "/ntps/{ntp_id}", ["ntp_id"]),
    endpoint!("updateNtpConfig", "PUT", "/ntps/{ntp_id}", ["ntp_id"]),
    endpoint!("reportActiveFiles", "GET", "/reports/active-files"),
    endpoint!("reportActivityAnalytics", "GET", "/reports/activity-analytics"),
    endpoint!("reportCloudActivity", "GET", "/reports/cloud-activity"),
    endpoint!(
        "reportLicensedUsage",
        "GET",
        "/reports/licensed-usage/{activation_id}",
        ["activation_id"]
    ),
    endpoint!("reportMobility", "GET", "/reports/mobility"),
    endpoint!("reportProxyUsage", "GET", "/reports/proxy-usage"),
    endpoint!(
        "reportReplicationLatencies",
        "GET",
        "/reports/replication/share-latencies/{share_uuid}",
        ["share_uuid"]
    ),
];

/// Looks up an endpoint by operation id.
pub fn find_endpoint(operation_id: &str) -> Result<&'static EndpointDefinition, ClientError> {
    ENDPOINTS
        .iter()
        .find(|endpoint| endpoint.operation_id == operation_id)
        .ok_or_else(|| ClientError::UnknownOperation(operation_id.to_owned()))
}

/// Renders an endpoint path template with the given parameters.
///
/// Every `{param}` segment must be covered by `path_params`; missing ones
/// return [`ClientError::MissingPathParameter`]. Values are percent-encoded.
pub fn render_path(
    endpoint: &EndpointDefinition,
    path_params: &[(&str, &str)],
) -> Result<String, ClientError> {
    let mut rendered = endpoint.path_template.to_owned();

    for required_param in endpoint.path_params {
        let value = path_params
            .iter()
            .find(|(name, _)| name == required_param)
            .map(|(_, value)| *value)
            .ok_or_else(|| ClientError::MissingPathParameter {
                operation_id: endpoint.operation_id.to_owned(),
                parameter: (*required_param).to_owned(),
            })?;

        let placeholder = format!("{{{required_param}}}");
        rendered = rendered.replace(&placeholder, &encode_path_segment(value));
    }

    Ok(rendered)
}

/// Parses the catalog's method string into a [`reqwest::Method`].
pub(crate) fn parse_method(
    endpoint: &EndpointDefinition,
) -> Result<reqwest::Method, ClientError> {
    reqwest::Method::from_bytes(endpoint.method.as_bytes())
        .map_err(|_| ClientError::UnknownOperation(endpoint.operation_id.to_owned()))
}

fn encode_path_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::{ENDPOINTS, find_endpoint, render_path};
    use crate::ClientError;

    #[test]
    fn every_endpoint_declares_its_template_parameters() {
        for endpoint in ENDPOINTS {
            for param in endpoint.path_params {
                assert!(
                    endpoint.path_template.contains(&format!("{{{param}}}")),
                    "endpoint '{}' declares '{param}' but the template lacks it",
                    endpoint.operation_id
                );
            }
            assert!(
                !endpoint.path_template.contains('{') || !endpoint.path_params.is_empty(),
                "endpoint '{}' has placeholders but declares no parameters",
                endpoint.operation_id
            );
        }
    }

    #[test]
    fn catalog_covers_every_management_module() {
        // One representative operation per resource family the appliance
        // exposes under the management prefix.
        for operation_id in [
            "login",
            "listNodes",
            "listSites",
            "listShares",
            "listShareSnapshots",
            "listStorageVolumes",
            "listLogicalVolumes",
            "listVolumeGroups",
            "listObjectives",
            "listTasks",
            "getAdConfiguration",
            "listBackupSchedules",
            "listClusterInfo",
            "listDiskDrives",
            "listDnsConfigs",
            "listFileSnapshotSchedules",
            "listGateways",
            "listNetworkInterfaces",
            "listNtpConfigs",
            "reportActiveFiles",
        ] {
            assert!(
                find_endpoint(operation_id).is_ok(),
                "missing catalog entry for '{operation_id}'"
            );
        }
    }

    #[test]
    fn backup_transfer_paths_take_volume_and_export() {
        let endpoint = find_endpoint("restoreNamedBackup").expect("endpoint exists");
        let path = render_path(
            endpoint,
            &[
                ("volume_ip", "10.0.0.5"),
                ("export_path", "/exports/home"),
                ("backup_name", "nightly-01"),
            ],
        )
        .expect("path renders");
        assert_eq!(
            path,
            "/mgmt/v1.2/rest/backup/backup-restore/10.0.0.5/%2Fexports%2Fhome/nightly-01"
        );
    }

    #[test]
    fn operation_ids_are_unique() {
        for (index, endpoint) in ENDPOINTS.iter().enumerate() {
            assert!(
                ENDPOINTS[index + 1..]
                    .iter()
                    .all(|other| other.operation_id != endpoint.operation_id),
                "duplicate operation id '{}'",
                endpoint.operation_id
            );
        }
    }

    #[test]
    fn render_path_replaces_required_parameters() {
        let endpoint = find_endpoint("getNode").expect("endpoint exists");
        let path = render_path(endpoint, &[("node_id", "node-7")]).expect("path renders");
        assert_eq!(path, "/mgmt/v1.2/rest/nodes/node-7");
    }

    #[test]
    fn render_path_percent_encodes_values() {
        let endpoint = find_endpoint("getShare").expect("endpoint exists");
        let path = render_path(endpoint, &[("share_id", "projects/alpha")]).expect("path renders");
        assert_eq!(path, "/mgmt/v1.2/rest/shares/projects%2Falpha");
    }

    #[test]
    fn render_path_encodes_spaces_as_percent_twenty() {
        // `+` in a path segment is a literal plus, not a space.
        let endpoint = find_endpoint("getShare").expect("endpoint exists");
        let path = render_path(endpoint, &[("share_id", "team share")]).expect("path renders");
        assert_eq!(path, "/mgmt/v1.2/rest/shares/team%20share");
    }

    #[test]
    fn render_path_reports_missing_parameter() {
        let endpoint = find_endpoint("getTask").expect("endpoint exists");
        let error = render_path(endpoint, &[]).expect_err("missing parameter must error");
        match error {
            ClientError::MissingPathParameter {
                operation_id,
                parameter,
            } => {
                assert_eq!(operation_id, "getTask");
                assert_eq!(parameter, "task_id");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_operation_is_rejected() {
        assert!(matches!(
            find_endpoint("rebootEverything"),
            Err(ClientError::UnknownOperation(_))
        ));
    }
}
