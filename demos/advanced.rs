use dtnagent::api::DtnNode;
use dtnagent::bpv7::EndpointId;
use dtnagent::config::{ClaConfig, NodeConfig, StaticPeerConfig};
use dtnagent::janitor::Janitor;
use std::collections::HashMap;

fn demo_config(
    node_id: &str,
    web_port: u16,
    endpoints: Vec<String>,
    statics: Vec<StaticPeerConfig>,
) -> NodeConfig {
    let mut http_settings = HashMap::new();
    http_settings.insert("bind".to_string(), format!("127.0.0.1:{web_port}"));
    NodeConfig {
        node_id: node_id.to_string(),
        web_port,
        db: "mem".to_string(),
        db_path: None,
        routing: "epidemic".to_string(),
        routing_settings: HashMap::new(),
        endpoints,
        services: HashMap::new(),
        clas: vec![ClaConfig {
            cla_type: "http".to_string(),
            settings: http_settings,
        }],
        statics,
        janitor_interval: 5,
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

    let sender_config = demo_config(
        "dtn://sender",
        14556,
        Vec::new(),
        vec![StaticPeerConfig {
            eid: "dtn://receiver".to_string(),
            address: "127.0.0.1:14557".to_string(),
            cla: vec!["http".to_string()],
        }],
    );
    let receiver_config = demo_config(
        "dtn://receiver",
        14557,
        vec!["dtn://receiver/inbox".to_string()],
        Vec::new(),
    );

    let sender = DtnNode::new(sender_config).await?;
    let receiver = DtnNode::new(receiver_config).await?;

    Janitor::new(5, 300).spawn(sender.clone());
    Janitor::new(5, 300).spawn(receiver.clone());

    tokio::spawn(dtnagent::web::serve(sender.clone(), 14556));
    tokio::spawn(dtnagent::web::serve(receiver.clone(), 14557));
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let id = sender
        .submit_bundle(
            EndpointId::from("dtn://receiver/inbox"),
            Some(EndpointId::from("dtn://sender/app")),
            b"advanced demo payload".to_vec(),
            3600,
        )
        .await?;
    println!("sender submitted {id}");

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    println!("sender stats: {:?}", sender.stats_snapshot().await);
    println!("receiver stats: {:?}", receiver.stats_snapshot().await);
    Ok(())
}
