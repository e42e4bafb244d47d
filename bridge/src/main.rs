use rfid_bridge::{serve, Bridge, BridgeConfig};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config = BridgeConfig::from_env();
    let addr = config.bind_addr();
    let bridge = Bridge::new(config);
    bridge.spawn_heartbeat();

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("RFID live updates bridge listening on {}", addr);
    log::info!("REST endpoint: POST /broadcast");
    log::info!("WebSocket:     GET  /ws");

    serve(bridge, listener).await
}
