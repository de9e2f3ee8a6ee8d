//! UDP heartbeat responder.
//!
//! Forwarders probe liveness by sending a datagram to the server's port;
//! every datagram is answered with a single zero byte.

use std::{
    io,
    net::{SocketAddr, UdpSocket as StdUdpSocket},
};

use log::{debug, info, warn};
use tokio::{net::UdpSocket, select};
use tokio_util::sync::CancellationToken;

/// Reply sent for every heartbeat datagram.
pub(crate) const HEARTBEAT_REPLY: [u8; 1] = [0x00];

pub(crate) struct Heartbeat {
    socket: UdpSocket,
}

impl Heartbeat {
    /// Adopt `socket` on the current event loop.
    pub(crate) fn open(socket: StdUdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket: UdpSocket::from_std(socket)?,
        })
    }

    pub(crate) async fn serve(self, stop: CancellationToken) {
        let local_addr = self.socket.local_addr().ok();
        info!("heartbeat listening: local_addr={local_addr:?}");
        let mut buf = [0u8; 64];
        loop {
            let received = select! {
                biased;

                () = stop.cancelled() => break,
                res = self.socket.recv_from(&mut buf) => res,
            };
            match received {
                Ok((_, peer)) => self.reply(peer),
                Err(e) => warn!("heartbeat receive failed: error={e}"),
            }
        }
        info!("heartbeat closed: local_addr={local_addr:?}");
    }

    fn reply(&self, peer: SocketAddr) {
        match self.socket.try_send_to(&HEARTBEAT_REPLY, peer) {
            Ok(_) => debug!("heartbeat answered: peer={peer}"),
            Err(e) => debug!("heartbeat reply dropped: peer={peer}, error={e}"),
        }
    }
}
