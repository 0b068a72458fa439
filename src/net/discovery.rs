//! LAN discovery beacon
//!
//! Periodically broadcasts a fixed sentinel over UDP so clients on the
//! same segment can find the server without configuration. Receivers
//! learn the server's address from the UDP source tuple; the payload
//! never changes and carries no state.

use super::types::DISCOVERY_SENTINEL;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

pub async fn run_beacon(discovery_port: u16, interval: Duration) {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("discovery beacon disabled, could not bind: {}", e);
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        warn!("discovery beacon disabled, SO_BROADCAST failed: {}", e);
        return;
    }

    debug!(
        "discovery beacon broadcasting to port {} every {:?}",
        discovery_port, interval
    );
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = socket
            .send_to(DISCOVERY_SENTINEL, (Ipv4Addr::BROADCAST, discovery_port))
            .await
        {
            warn!("discovery broadcast failed: {}", e);
        }
    }
}
