//! Readiness aggregation against the HTTP mock server.

use std::sync::Arc;

use k8s_mock::http::{HttpMockK8sServer, RunningHttpMockK8sServer};
use kconverge::{
	config::ClusterConfig,
	k8s::{client::ClusterConnection, cluster::KubeCluster, readiness::ReadinessAggregator},
};
use regex::Regex;
use serde_json::{json, Value};

fn deployment(name: &str, ready: i32, desired: i32) -> Value {
	json!({
		"apiVersion": "apps/v1",
		"kind": "Deployment",
		"metadata": { "name": name, "namespace": "team-a" },
		"spec": {
			"replicas": desired,
			"selector": { "matchLabels": { "app": name } },
			"template": { "metadata": { "labels": { "app": name } } }
		},
		"status": { "readyReplicas": ready }
	})
}

fn load_balancer(name: &str, ingress: &[&str]) -> Value {
	let ingress: Vec<_> = ingress.iter().map(|ip| json!({ "ip": ip })).collect();
	json!({
		"apiVersion": "v1",
		"kind": "Service",
		"metadata": { "name": name, "namespace": "team-a" },
		"spec": {
			"type": "LoadBalancer",
			"clusterIP": "10.96.0.10",
			"clusterIPs": ["10.96.0.10"],
			"ports": [{ "port": 443 }]
		},
		"status": { "loadBalancer": { "ingress": ingress } }
	})
}

async fn aggregator(resources: Vec<Value>) -> (RunningHttpMockK8sServer, ReadinessAggregator) {
	let server = HttpMockK8sServer::builder()
		.resources(resources)
		.build()
		.start()
		.await;
	let connection = ClusterConnection::from_config_with_kubeconfig(&ClusterConfig::default(), server.kubeconfig())
		.await
		.expect("connection should succeed");
	let aggregator = ReadinessAggregator::new(Arc::new(KubeCluster::from_connection(&connection)));
	(server, aggregator)
}

#[tokio::test]
async fn test_check_mixed_readiness() {
	let (_server, aggregator) = aggregator(vec![
		deployment("api", 3, 3),
		deployment("worker", 1, 2),
		load_balancer("ingress", &[]),
	])
	.await;

	let report = aggregator
		.check("team-a", &["deployment:.*", "service:ingress", "stateful:db"], false)
		.await
		.unwrap();

	assert!(!report.all_ready);
	assert_eq!(
		report.lines().collect::<Vec<_>>(),
		vec![
			"deployment: api (3/3) Ready",
			"deployment: worker (1/2) Not Ready",
			"service: ingress Not Ready",
		]
	);
}

#[tokio::test]
async fn test_check_empty_namespace() {
	let (_server, aggregator) = aggregator(vec![]).await;

	let report = aggregator
		.check("team-a", &["deployment:web", "demonset:agent"], false)
		.await
		.unwrap();
	assert!(report.all_ready);
	assert!(report.records.is_empty());

	let none_running = aggregator
		.check("team-a", &["deployment:web"], true)
		.await
		.unwrap();
	assert!(none_running.all_ready);
}

#[tokio::test]
async fn test_service_endpoints() {
	let (_server, aggregator) = aggregator(vec![load_balancer("ingress", &["198.51.100.4"])]).await;

	let endpoints = aggregator
		.service_endpoints("team-a", &Regex::new("^ingress$").unwrap())
		.await
		.unwrap();
	assert_eq!(endpoints.len(), 1);
	assert_eq!(endpoints[0].service_type, "LoadBalancer");
	assert_eq!(endpoints[0].ip, "198.51.100.4");
	assert_eq!(endpoints[0].port, Some(443));
}
