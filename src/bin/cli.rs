use clap::Parser;
use dtnagent::api::DtnNode;
use dtnagent::config::NodeConfig;
use dtnagent::janitor::Janitor;

#[derive(Parser)]
#[clap(about = "BPv7 delay-tolerant networking bundle agent")]
struct Opts {
    /// Override the configured management/CLA HTTP port.
    #[clap(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("📦 Loading node configuration");
    let mut config = NodeConfig::load()?;
    if let Some(port) = Opts::parse().port {
        config.web_port = port;
    }

    let node_id = config.node_eid();
    let port = config.web_port;
    let janitor = Janitor::new(config.janitor_interval, config.peer_timeout);

    let core = DtnNode::new(config).await?;
    janitor.spawn(core.clone());
    println!("✅ Bundle agent {node_id} ready, listening on port {port}");

    dtnagent::web::serve(core, port).await
}
