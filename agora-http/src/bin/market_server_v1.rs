use std::env;

use actix_web::{web, App, HttpServer};
use tokio::net::UdpSocket;

use agora::market::MarketNode;
use agora::peer::{PeerAddress, PeerDirectory};
use agora_http::audit::AuditLog;
use agora_http::http::market_v1::{server, AppState};
use agora_http::udp;

/// Starts one market node:
/// `market_server_v1 <name> <address> <http_port> <udp_port> [<peer>,<rpc_url>,<udp_addr> ...]`
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    let name: String = args[1].clone();
    let address: String = args[2].clone();
    let http_port: u16 = args[3].parse().unwrap();
    let udp_port: u16 = args[4].parse().unwrap();

    let mut peers = PeerDirectory::new();
    for peer in &args[5..] {
        let mut parts = peer.splitn(3, ',');
        let peer_name = parts.next().unwrap();
        let rpc = parts.next().unwrap();
        let udp_addr = parts.next().unwrap();
        peers.add_peer(peer_name, PeerAddress::new(rpc, udp_addr));
    }

    let state = AppState::new(MarketNode::new(&name), peers);
    let state = match AuditLog::new("logs", &name) {
        Ok(audit) => state.with_audit(audit),
        Err(err) => {
            log::warn!("audit log disabled: {err}");
            state
        }
    };
    let state = web::Data::new(state);

    let responder = UdpSocket::bind(format!("{address}:{udp_port}")).await?;
    tokio::spawn(udp::serve(responder, state.market()));

    log::info!("{name} serving RPC on {address}:{http_port}, availability on udp {udp_port}");

    let app_state = state.clone();
    HttpServer::new(move || App::new().app_data(app_state.clone()).configure(server::routes))
        .bind((address, http_port))?
        .run()
        .await
}
