use actix_web::{web, App, HttpServer};
use tokio::net::UdpSocket;

use agora::market::MarketNode;
use agora::peer::{PeerAddress, PeerDirectory};
use agora_http::audit::AuditLog;
use agora_http::http::market_v1::{server, AppState};
use agora_http::udp;

const MARKETS: [(&str, u16, u16); 3] = [
    ("NewYork", 8080, 5000),
    ("London", 8081, 5001),
    ("Tokyo", 8082, 5002),
];

fn peers_for(own: &str) -> PeerDirectory {
    let mut peers = PeerDirectory::new();
    for (name, http_port, udp_port) in MARKETS {
        if name != own {
            peers.add_peer(
                name,
                PeerAddress::new(
                    format!("http://127.0.0.1:{http_port}"),
                    format!("127.0.0.1:{udp_port}"),
                ),
            );
        }
    }
    peers
}

/// The fixed three-market federation on localhost, all nodes in one process.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let mut servers = Vec::new();
    for (name, http_port, udp_port) in MARKETS {
        let state = AppState::new(MarketNode::new(name), peers_for(name));
        let state = match AuditLog::new("logs", name) {
            Ok(audit) => state.with_audit(audit),
            Err(err) => {
                log::warn!("audit log disabled for {name}: {err}");
                state
            }
        };
        let state = web::Data::new(state);

        let responder = UdpSocket::bind(("127.0.0.1", udp_port)).await?;
        tokio::spawn(udp::serve(responder, state.market()));

        let app_state = state.clone();
        let server =
            HttpServer::new(move || App::new().app_data(app_state.clone()).configure(server::routes))
                .bind(("127.0.0.1", http_port))?
                .run();
        log::info!("{name} ready on http {http_port} / udp {udp_port}");
        servers.push(tokio::spawn(server));
    }

    for server in servers {
        server.await.map_err(std::io::Error::other)??;
    }
    Ok(())
}
