// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP endpoint for the Context-Manager RPC (port 34964).
//!
//! The RPC engine talks through the [`Endpoint`] trait; production binds a
//! real socket via socket2, tests wire two [`PairEndpoint`]s together.

use crate::config::PN_RPC_PORT;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

/// Datagram endpoint abstraction for the RPC engine.
pub trait Endpoint: Send + Sync {
    fn send_to(&self, payload: &[u8], peer: SocketAddr) -> io::Result<()>;

    /// Wait up to `timeout` for one datagram; `Ok(None)` on timeout.
    fn recv_from(&self, timeout: Duration) -> io::Result<Option<(Vec<u8>, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Real UDP endpoint bound to the PROFINET RPC port.
pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    /// Bind 0.0.0.0:34964 -- the server side devices address their
    /// ApplicationReady callbacks to (falls back to ephemeral when a second
    /// controller instance holds the port).
    pub fn bind() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        let preferred = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, PN_RPC_PORT);
        if socket.bind(&SocketAddr::V4(preferred).into()).is_err() {
            let fallback = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
            socket.bind(&SocketAddr::V4(fallback).into())?;
            log::warn!(
                "[UdpEndpoint] port {} busy, bound ephemeral instead",
                PN_RPC_PORT
            );
        }
        let socket: UdpSocket = socket.into();
        log::debug!("[UdpEndpoint] bound {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    /// Ephemeral-port socket for the client side; devices answer to the
    /// request's source address, so the client and server sockets never
    /// contend for each other's datagrams.
    pub fn bind_ephemeral() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket.bind(&SocketAddr::V4(addr).into())?;
        let socket: UdpSocket = socket.into();
        log::debug!("[UdpEndpoint] client bound {}", socket.local_addr()?);
        Ok(Self { socket })
    }
}

impl Endpoint for UdpEndpoint {
    fn send_to(&self, payload: &[u8], peer: SocketAddr) -> io::Result<()> {
        self.socket.send_to(payload, peer)?;
        Ok(())
    }

    fn recv_from(&self, timeout: Duration) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        self.socket.set_read_timeout(Some(timeout))?;
        let mut buf = vec![0u8; 4096];
        match self.socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                buf.truncate(n);
                Ok(Some((buf, peer)))
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// In-memory datagram endpoint for tests.
pub struct PairEndpoint {
    addr: SocketAddr,
    tx: Sender<(Vec<u8>, SocketAddr)>,
    rx: Receiver<(Vec<u8>, SocketAddr)>,
}

impl PairEndpoint {
    /// Two endpoints that deliver to each other regardless of the peer
    /// address passed to `send_to` (single-segment harness).
    pub fn pair() -> (PairEndpoint, PairEndpoint) {
        let addr_a: SocketAddr = "192.168.1.1:34964".parse().expect("literal addr");
        let addr_b: SocketAddr = "192.168.1.50:34964".parse().expect("literal addr");
        let (tx_ab, rx_ab) = bounded(256);
        let (tx_ba, rx_ba) = bounded(256);
        (
            PairEndpoint {
                addr: addr_a,
                tx: tx_ab,
                rx: rx_ba,
            },
            PairEndpoint {
                addr: addr_b,
                tx: tx_ba,
                rx: rx_ab,
            },
        )
    }
}

impl Endpoint for PairEndpoint {
    fn send_to(&self, payload: &[u8], _peer: SocketAddr) -> io::Result<()> {
        self.tx
            .try_send((payload.to_vec(), self.addr))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pair endpoint gone"))
    }

    fn recv_from(&self, timeout: Duration) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        match self.rx.recv_timeout(timeout) {
            Ok(pair) => Ok(Some(pair)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pair endpoint gone",
            )),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}
