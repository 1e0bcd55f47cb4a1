use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use agora::market::MarketNode;

//One text datagram each way: LIST_AVAILABILITY <category> in, one Share: line per
//instrument out. The lock is held only while scanning, never across a socket operation.
pub async fn serve(socket: UdpSocket, market: Arc<RwLock<MarketNode>>) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let (len, src) = socket.recv_from(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..len]).into_owned();
        let response = answer(request.trim(), &market);
        if let Err(err) = socket.send_to(response.as_bytes(), src).await {
            log::warn!("availability reply to {src} failed: {err}");
        }
    }
}

fn answer(request: &str, market: &RwLock<MarketNode>) -> String {
    if let Some(category) = request.strip_prefix("LIST_AVAILABILITY ") {
        let records = {
            let market = market.read().unwrap();
            market.availability(category.trim())
        };
        records
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        "INVALID_REQUEST".to_string()
    }
}

pub async fn query(addr: &str, category: &str, timeout: Duration) -> Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("binding query socket")?;
    socket
        .send_to(format!("LIST_AVAILABILITY {category}").as_bytes(), addr)
        .await
        .with_context(|| format!("sending availability request to {addr}"))?;
    let mut buf = vec![0u8; 4096];
    let (len, _) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
        .await
        .with_context(|| format!("availability request to {addr} timed out"))??;
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}
