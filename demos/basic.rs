use dtnagent::api::DtnNode;
use dtnagent::bpv7::EndpointId;
use dtnagent::config::NodeConfig;
use std::collections::HashMap;

fn demo_config(node_id: &str, endpoints: Vec<String>) -> NodeConfig {
    NodeConfig {
        node_id: node_id.to_string(),
        web_port: 0,
        db: "mem".to_string(),
        db_path: None,
        routing: "epidemic".to_string(),
        routing_settings: HashMap::new(),
        endpoints,
        services: HashMap::new(),
        clas: Vec::new(),
        statics: Vec::new(),
        janitor_interval: 30,
        peer_timeout: 300,
        announcement_interval: 10,
        disable_neighbour_discovery: true,
        generate_status_reports: true,
        parallel_bundle_processing: false,
        workdir: ".".to_string(),
        debug: false,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = demo_config("dtn://n1", vec!["dtn://n1/echo".to_string()]);
    let node = DtnNode::new(config).await?;

    let id = node
        .submit_bundle(
            EndpointId::from("dtn://n1/echo"),
            Some(EndpointId::from("dtn://n1/ping")),
            b"Hello, DTN!".to_vec(),
            3600,
        )
        .await?;
    println!("submitted bundle {id}");

    match node.application_agent.take_pending(&EndpointId::from("dtn://n1/echo")) {
        Some(bundle) => println!("delivered payload: {}", String::from_utf8_lossy(bundle.payload())),
        None => println!("nothing pending"),
    }

    let stats = node.stats_snapshot().await;
    println!("stats: {stats:?}");
    Ok(())
}
