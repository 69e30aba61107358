use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "submariner.io",
    version = "v1",
    kind = "Endpoint",
    plural = "endpoints",
    namespaced,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.cluster_id"}"#,
    printcolumn = r#"{"name":"Hostname","type":"string","jsonPath":".spec.hostname"}"#,
    printcolumn = r#"{"name":"Private IP","type":"string","jsonPath":".spec.private_ip"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct EndpointSpec {
    pub cluster_id: String,
    pub cable_name: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub private_ip: String,
    #[serde(default)]
    pub public_ip: String,
    #[serde(default)]
    pub nat_enabled: bool,
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub backend_config: BTreeMap<String, String>,
}

impl Endpoint {
    pub fn is_local_to(&self, cluster_id: &str) -> bool {
        self.spec.cluster_id == cluster_id
    }
}
