use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::crd::Endpoint;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCluster {
    pub endpoint: String,
    pub hostname: String,
    pub subnets: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteAgentPod {
    pub node: Option<String>,
    pub pod_ip: Option<String>,
}

/// What the controller currently knows about the multicluster network:
/// remote clusters keyed by cluster id, route-agent pods keyed by name.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    local_cluster_id: String,
    remote_clusters: BTreeMap<String, RemoteCluster>,
    agents: BTreeMap<String, RouteAgentPod>,
}

impl Topology {
    pub fn new(local_cluster_id: &str) -> Self {
        Self {
            local_cluster_id: local_cluster_id.to_string(),
            ..Default::default()
        }
    }

    /// Returns true when the view changed.
    pub fn apply_endpoint(&mut self, endpoint: &Endpoint) -> bool {
        if endpoint.is_local_to(&self.local_cluster_id) {
            return false;
        }

        let remote = RemoteCluster {
            endpoint: endpoint.name_any(),
            hostname: endpoint.spec.hostname.clone(),
            subnets: endpoint.spec.subnets.clone(),
        };
        self.remote_clusters
            .insert(endpoint.spec.cluster_id.clone(), remote.clone())
            != Some(remote)
    }

    pub fn remove_endpoint(&mut self, endpoint: &Endpoint) -> bool {
        let cluster_id = &endpoint.spec.cluster_id;
        // A newer endpoint may already have replaced this one.
        match self.remote_clusters.get(cluster_id) {
            Some(known) if known.endpoint == endpoint.name_any() => {
                self.remote_clusters.remove(cluster_id);
                true
            }
            _ => false,
        }
    }

    pub fn apply_pod(&mut self, pod: &Pod) -> bool {
        let agent = RouteAgentPod {
            node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
            pod_ip: pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
        };
        self.agents.insert(pod.name_any(), agent.clone()) != Some(agent)
    }

    pub fn remove_pod(&mut self, pod: &Pod) -> bool {
        self.agents.remove(&pod.name_any()).is_some()
    }

    pub fn remote_subnets(&self) -> Vec<&str> {
        self.remote_clusters
            .values()
            .flat_map(|remote| remote.subnets.iter().map(String::as_str))
            .collect()
    }

    pub fn remote_clusters(&self) -> &BTreeMap<String, RemoteCluster> {
        &self.remote_clusters
    }

    pub fn agent_ips(&self) -> Vec<&str> {
        self.agents
            .values()
            .filter_map(|agent| agent.pod_ip.as_deref())
            .collect()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn clear(&mut self) {
        self.remote_clusters.clear();
        self.agents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_local_endpoint_is_ignored() {
        let mut topology = Topology::new("east");

        assert!(!topology.apply_endpoint(&testing::endpoint("east", "east-gw", &["10.0.0.0/16"])));
        assert!(topology.remote_clusters().is_empty());
    }

    #[test]
    fn test_remote_endpoint_tracked_until_removed() {
        let mut topology = Topology::new("east");
        let west = testing::endpoint("west", "west-gw", &["10.1.0.0/16", "100.1.0.0/16"]);

        assert!(topology.apply_endpoint(&west));
        assert!(!topology.apply_endpoint(&west));
        assert_eq!(topology.remote_subnets(), vec!["10.1.0.0/16", "100.1.0.0/16"]);

        assert!(topology.remove_endpoint(&west));
        assert!(topology.remote_subnets().is_empty());
    }

    #[test]
    fn test_stale_endpoint_delete_keeps_replacement() {
        let mut topology = Topology::new("east");
        let old = testing::endpoint("west", "west-gw-old", &["10.1.0.0/16"]);
        let new = testing::endpoint("west", "west-gw-new", &["10.1.0.0/16"]);

        topology.apply_endpoint(&old);
        topology.apply_endpoint(&new);

        assert!(!topology.remove_endpoint(&old));
        assert_eq!(topology.remote_clusters()["west"].endpoint, "west-gw-new");
    }

    #[test]
    fn test_pods_tracked_by_name() {
        let mut topology = Topology::new("east");
        let pod = testing::route_agent_pod("node-1", "10.0.1.5");

        assert!(topology.apply_pod(&pod));
        assert!(!topology.apply_pod(&pod));
        assert_eq!(topology.agent_ips(), vec!["10.0.1.5"]);

        assert!(topology.remove_pod(&pod));
        assert_eq!(topology.agent_count(), 0);
    }
}
