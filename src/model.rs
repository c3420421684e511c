use serde::{Deserialize, Serialize};

/// Software version block reported by a node.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareVersion {
    /// Dotted version string, for example `5.1.18`.
    pub version: String,
}

/// One appliance node as reported by the `listNodes`/`getNode` endpoints.
///
/// Only the fields the SDK acts on are modeled; the server sends many more,
/// which serde ignores. Callers needing the full payload can use
/// [`crate::AnvilClient::call_operation`] and work with raw JSON.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Display name of the node.
    pub name: String,
    /// Node role, for example `ANVIL` or `DSX`.
    #[serde(default)]
    pub product_node_type: Option<String>,
    /// Current lifecycle state, for example `UP`.
    #[serde(default)]
    pub state: Option<String>,
    /// Installed software version, absent on nodes still joining.
    #[serde(default)]
    pub sw_version: Option<SoftwareVersion>,
}
