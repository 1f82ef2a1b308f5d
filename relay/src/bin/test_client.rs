//! Headless exerciser for a running relay: connects, subscribes to the
//! 9-slice around its position, walks east re-subscribing at parcel
//! boundaries, and prints whatever telemetry the relay forwards back.

use bincode::{deserialize, serialize};
use shared::spatial;
use shared::{GridAddress, Packet, Vector3, PARCEL_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let server_addr = "127.0.0.1:4433".parse::<SocketAddr>()?;
    let entity_id = std::process::id() as u64;

    // Connect handshake
    let connect = Packet::Connect {
        client_version: PROTOCOL_VERSION,
        entity_id,
    };
    println!("Sending connect request to {}", server_addr);
    socket.send_to(&serialize(&connect)?, server_addr).await?;

    let mut buf = [0u8; 2048];
    let (len, _) = socket.recv_from(&mut buf).await?;
    match deserialize::<Packet>(&buf[..len])? {
        Packet::Connected { connection_id } => {
            println!("Connected with connection id {}", connection_id);
        }
        other => {
            println!("Expected Connected but got: {:?}", other);
            return Ok(());
        }
    }

    let mut x = 0.0f32;
    let z = 0.0f32;

    // Watch our own cell plus its eight neighbors.
    let mut current_slice = spatial::nine_slice(x, z)?;
    send_subscription(&socket, server_addr, &current_slice, &[]).await?;

    for step in 0..20 {
        x += PARCEL_SIZE / 4.0;

        // Crossing a parcel boundary shifts the 9-slice: drop the cells
        // behind us, pick up the new ones ahead.
        let slice = spatial::nine_slice(x, z)?;
        if slice != current_slice {
            let stale: Vec<GridAddress> = current_slice
                .iter()
                .copied()
                .filter(|cell| !slice.contains(cell))
                .collect();
            let fresh: Vec<GridAddress> = slice
                .iter()
                .copied()
                .filter(|cell| !current_slice.contains(cell))
                .collect();
            println!(
                "step {}: crossed a parcel boundary (+{} / -{} cells)",
                step,
                fresh.len(),
                stale.len()
            );
            send_subscription(&socket, server_addr, &fresh, &stale).await?;
            current_slice = slice;
        }

        let telemetry = Packet::Telemetry {
            position: Vector3::new(x, 0.0, z),
        };
        socket.send_to(&serialize(&telemetry)?, server_addr).await?;

        // Print whatever the relay forwarded our way meanwhile.
        while let Ok(Ok((len, _))) = timeout(Duration::from_millis(50), socket.recv_from(&mut buf)).await
        {
            match deserialize::<Packet>(&buf[..len]) {
                Ok(Packet::TelemetryState {
                    entity_id,
                    position,
                }) => {
                    println!(
                        "  entity {} at ({:.1}, {:.1}, {:.1})",
                        entity_id, position.x, position.y, position.z
                    );
                }
                Ok(other) => println!("  unexpected packet: {:?}", other),
                Err(e) => println!("  failed to decode relayed packet: {}", e),
            }
        }

        sleep(Duration::from_millis(200)).await;
    }

    socket
        .send_to(&serialize(&Packet::Disconnect)?, server_addr)
        .await?;
    println!("Sent disconnect, test client finished");

    Ok(())
}

async fn send_subscription(
    socket: &UdpSocket,
    server_addr: SocketAddr,
    subscribe_cells: &[GridAddress],
    unsubscribe_cells: &[GridAddress],
) -> Result<(), Box<dyn std::error::Error>> {
    let packet = Packet::GridSubscription {
        subscribe_cells: subscribe_cells.to_vec(),
        unsubscribe_cells: unsubscribe_cells.to_vec(),
    };
    socket.send_to(&serialize(&packet)?, server_addr).await?;
    Ok(())
}
