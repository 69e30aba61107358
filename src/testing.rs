//! Fixtures for tests that talk to a fake API server.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
use kube::api::ObjectMeta;
use kube::{Client, Config};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use crate::crd::{Endpoint, EndpointSpec};

pub use crate::watch::ROUTE_AGENT_SELECTOR;

pub fn client(server: &MockServer) -> Client {
    let config = Config::new(server.uri().parse().unwrap());
    Client::try_from(config).unwrap()
}

pub fn route_agent_pod(node: &str, ip: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(format!("route-agent-{}", node)),
            namespace: Some("submariner".to_string()),
            labels: Some(BTreeMap::from([(
                "app".to_string(),
                "submariner-routeagent".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            pod_ip: Some(ip.to_string()),
            ..Default::default()
        }),
    }
}

pub fn endpoint(cluster_id: &str, name: &str, subnets: &[&str]) -> Endpoint {
    let mut endpoint = Endpoint::new(
        name,
        EndpointSpec {
            cluster_id: cluster_id.to_string(),
            cable_name: format!("submariner-cable-{}", cluster_id),
            hostname: format!("{}-gateway", cluster_id),
            subnets: subnets.iter().map(|s| s.to_string()).collect(),
            private_ip: "172.18.0.4".to_string(),
            ..Default::default()
        },
    );
    endpoint.metadata.namespace = Some("submariner".to_string());
    endpoint
}

struct ListRequest;

impl Match for ListRequest {
    fn matches(&self, request: &Request) -> bool {
        !request.url.query_pairs().any(|(key, _)| key == "watch")
    }
}

async fn mount_list(
    server: &MockServer,
    list_path: String,
    list: serde_json::Value,
    selector: Option<&str>,
) {
    // Watches hang until the test drops the server.
    Mock::given(method("GET"))
        .and(path(list_path.clone()))
        .and(query_param("watch", "true"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(300)))
        .mount(server)
        .await;

    let lists = Mock::given(method("GET"))
        .and(path(list_path))
        .and(ListRequest);
    let lists = match selector {
        Some(selector) => lists.and(query_param("labelSelector", selector)),
        None => lists,
    };
    lists
        .respond_with(ResponseTemplate::new(200).set_body_json(list))
        .mount(server)
        .await;
}

pub async fn mount_pods(server: &MockServer, namespace: &str, pods: &[Pod]) {
    let list = json!({
        "apiVersion": "v1",
        "kind": "PodList",
        "metadata": { "resourceVersion": "100" },
        "items": pods,
    });
    mount_list(
        server,
        format!("/api/v1/namespaces/{}/pods", namespace),
        list,
        Some(ROUTE_AGENT_SELECTOR),
    )
    .await;
}

pub async fn mount_endpoints(server: &MockServer, namespace: &str, endpoints: &[Endpoint]) {
    let list = json!({
        "apiVersion": "submariner.io/v1",
        "kind": "EndpointList",
        "metadata": { "resourceVersion": "100" },
        "items": endpoints,
    });
    mount_list(
        server,
        format!("/apis/submariner.io/v1/namespaces/{}/endpoints", namespace),
        list,
        None,
    )
    .await;
}
