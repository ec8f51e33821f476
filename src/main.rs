use actix_web::{web, App, HttpServer};
use env_logger::Env;

use chordkv::api;
use chordkv::config::{NodeConfig, MAINTENANCE_INTERVAL};
use chordkv::Peer;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = NodeConfig::from_env();

    let default_level = if config.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    log::info!(
        "starting node at {}:{} with {}-bit identifiers",
        config.ip,
        config.port,
        config.m
    );

    let peer = web::Data::new(Peer::new(&config.ip, config.port, config.m));

    // Background maintenance: stabilize and fix one finger on every tick.
    // Runs whether or not the peer has joined a ring; a solo peer's probes
    // are cheap no-ops against itself.
    let maintenance = peer.clone();
    actix_rt::spawn(async move {
        loop {
            actix_rt::time::sleep(MAINTENANCE_INTERVAL).await;
            maintenance.stabilize().await;
            maintenance.fix_fingers().await;
        }
    });

    // The listener binds all interfaces; peers reach us at the advertised
    // NODE_IP baked into our NodeRef
    HttpServer::new(move || App::new().app_data(peer.clone()).configure(api::configure))
        .bind(("0.0.0.0", config.port))?
        .run()
        .await
}
