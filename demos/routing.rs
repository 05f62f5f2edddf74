use dtnagent::api::DtnNode;
use dtnagent::bpv7::EndpointId;
use dtnagent::config::{ClaConfig, NodeConfig, StaticPeerConfig};
use std::collections::HashMap;

fn static_routing_config() -> NodeConfig {
    let routes = serde_json::json!([
        {"index": 0, "sourcePattern": "*", "destinationPattern": "dtn://dest/*", "via": "dtn://router1"},
        {"index": 1, "sourcePattern": "*", "destinationPattern": "dtn://other-dest/*", "via": "dtn://router2"},
    ]);
    let mut routing_settings = HashMap::new();
    let mut static_settings = HashMap::new();
    static_settings.insert("routes".to_string(), routes.to_string());
    routing_settings.insert("static".to_string(), static_settings);

    NodeConfig {
        node_id: "dtn://n1".to_string(),
        web_port: 0,
        db: "mem".to_string(),
        db_path: None,
        routing: "static".to_string(),
        routing_settings,
        endpoints: Vec::new(),
        services: HashMap::new(),
        clas: vec![ClaConfig {
            cla_type: "tcp".to_string(),
            settings: HashMap::new(),
        }],
        statics: vec![
            StaticPeerConfig {
                eid: "dtn://router1".to_string(),
                address: "127.0.0.1:15001".to_string(),
                cla: vec!["tcp".to_string()],
            },
            StaticPeerConfig {
                eid: "dtn://router2".to_string(),
                address: "127.0.0.1:15002".to_string(),
                cla: vec!["tcp".to_string()],
            },
        ],
        janitor_interval: 30,
        peer_timeout: 300,
        announcement_interval: 10,
        disable_neighbour_discovery: true,
        generate_status_reports: false,
        parallel_bundle_processing: false,
        workdir: ".".to_string(),
        debug: false,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("static routing: glob source/destination patterns picked by first match");
    let node = DtnNode::new(static_routing_config()).await?;

    let destinations = ["dtn://dest/app", "dtn://other-dest/app", "dtn://unmatched/app"];
    for dst in destinations {
        let bundle = dtnagent::Bundle::new(
            EndpointId::from("dtn://n1/app"),
            EndpointId::from(dst),
            b"routing probe".to_vec(),
        );
        let decision = node.get_routing_decision(&bundle).await;
        println!(
            "  {dst} -> local={} hops={:?}",
            decision.is_local_delivery,
            decision.next_hops.iter().map(|p| p.eid.description()).collect::<Vec<_>>()
        );
    }

    Ok(())
}
