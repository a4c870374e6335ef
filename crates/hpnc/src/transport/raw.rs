// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! AF_PACKET raw link bound to one interface (Linux).
//!
//! Requires CAP_NET_RAW. A failed open is reported as
//! [`LinkError::CapabilityMissing`] and the PROFINET subsystem stays down --
//! there is no degraded simulation mode.

use super::{EthFrame, Link, LinkError, LinkResult};
use crate::core::types::MacAddr;
use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Maximum frame we accept from the wire (standard MTU + headers).
const RECV_BUF_LEN: usize = 1522;

/// Raw Ethernet attachment on a named interface.
pub struct RawLink {
    fd: RawFd,
    ifindex: i32,
    mac: MacAddr,
}

// SAFETY: the fd is used only through send/recv/poll syscalls, which are
// thread-safe; interior state is immutable after construction.
unsafe impl Send for RawLink {}
unsafe impl Sync for RawLink {}

impl RawLink {
    /// Open the interface for PROFINET traffic.
    ///
    /// Binds an AF_PACKET socket to `interface`, filtering on the PROFINET
    /// EtherType, and optionally sets SO_PRIORITY=6 so the egress qdisc
    /// prefers RT frames.
    pub fn open(interface: &str, socket_priority: bool) -> LinkResult<Self> {
        let proto = (crate::config::PN_ETHERTYPE as u16).to_be() as libc::c_int;

        // SAFETY: socket() with constant arguments; the result is checked.
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, proto) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(LinkError::CapabilityMissing(format!(
                "AF_PACKET socket on {}: {} (CAP_NET_RAW required)",
                interface, err
            )));
        }

        let ifindex = match Self::ifindex(interface) {
            Ok(idx) => idx,
            Err(e) => {
                // SAFETY: fd is valid from the successful socket() above;
                // close once on the error path.
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        let mac = match Self::hw_addr(fd, interface) {
            Ok(mac) => mac,
            Err(e) => {
                // SAFETY: as above.
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        // Bind to the interface so we only see its traffic.
        let mut addr: libc::sockaddr_ll = // SAFETY: sockaddr_ll is POD; all-zero is a valid initial state.
            unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = proto as u16;
        addr.sll_ifindex = ifindex;
        // SAFETY: addr is a properly initialized sockaddr_ll and the size
        // argument matches; fd is valid.
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: close valid fd once on error path.
            unsafe { libc::close(fd) };
            return Err(LinkError::CapabilityMissing(format!(
                "bind to {}: {}",
                interface, err
            )));
        }

        if socket_priority {
            let prio: libc::c_int = 6;
            // SAFETY: setsockopt with a valid fd, int option value and
            // matching size. A failure is non-fatal (logged, QoS degraded).
            let rc = unsafe {
                libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_PRIORITY,
                    &prio as *const libc::c_int as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                log::warn!(
                    "[RawLink] SO_PRIORITY=6 on {} failed: {}",
                    interface,
                    io::Error::last_os_error()
                );
            }
        }

        log::info!(
            "[RawLink] opened iface={} ifindex={} mac={}",
            interface,
            ifindex,
            mac
        );
        Ok(Self { fd, ifindex, mac })
    }

    fn ifindex(interface: &str) -> LinkResult<i32> {
        let c_name = CString::new(interface)
            .map_err(|_| LinkError::CapabilityMissing(format!("bad interface name {}", interface)))?;
        // SAFETY: c_name is a valid NUL-terminated string.
        let idx = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
        if idx == 0 {
            return Err(LinkError::CapabilityMissing(format!(
                "interface {} not found",
                interface
            )));
        }
        Ok(idx as i32)
    }

    fn hw_addr(fd: RawFd, interface: &str) -> LinkResult<MacAddr> {
        // SAFETY: ifreq is POD; all-zero is a valid initial state.
        let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
        for (dst, src) in req.ifr_name.iter_mut().zip(interface.as_bytes()) {
            *dst = *src as libc::c_char;
        }
        // SAFETY: fd is valid, req is a properly initialized ifreq, and
        // SIOCGIFHWADDR writes into it.
        let rc = unsafe { libc::ioctl(fd, libc::SIOCGIFHWADDR, &mut req) };
        if rc < 0 {
            return Err(LinkError::CapabilityMissing(format!(
                "SIOCGIFHWADDR on {}: {}",
                interface,
                io::Error::last_os_error()
            )));
        }
        let mut mac = [0u8; 6];
        // SAFETY: ifr_hwaddr.sa_data holds at least 6 bytes for an Ethernet
        // interface after a successful SIOCGIFHWADDR.
        let sa_data = unsafe { req.ifr_ifru.ifru_hwaddr.sa_data };
        for (i, b) in mac.iter_mut().enumerate() {
            *b = sa_data[i] as u8;
        }
        Ok(MacAddr(mac))
    }
}

impl Link for RawLink {
    fn send_frame(&self, frame: &[u8]) -> LinkResult<()> {
        // SAFETY: sockaddr_ll is POD; zeroed then filled with the bound
        // interface index and destination MAC from the frame itself.
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_ifindex = self.ifindex;
        addr.sll_halen = 6;
        addr.sll_addr[..6].copy_from_slice(&frame[..6.min(frame.len())]);

        // SAFETY: fd is valid; frame pointer/length describe a live slice;
        // addr is initialized above with the matching size argument.
        let rc = unsafe {
            libc::sendto(
                self.fd,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(LinkError::SendFailed(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> LinkResult<Option<EthFrame>> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: pfd is a single valid pollfd; timeout is bounded.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(LinkError::RecvFailed(err));
        }
        if rc == 0 {
            return Ok(None);
        }

        let mut buf = vec![0u8; RECV_BUF_LEN];
        // SAFETY: fd is valid and readable per poll(); buf is a live
        // mutable slice of RECV_BUF_LEN bytes.
        let n = unsafe {
            libc::recv(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n < 0 {
            return Err(LinkError::RecvFailed(io::Error::last_os_error()));
        }
        buf.truncate(n as usize);
        Ok(Some(EthFrame { data: buf }))
    }

    fn local_mac(&self) -> MacAddr {
        self.mac
    }
}

impl Drop for RawLink {
    fn drop(&mut self) {
        // SAFETY: fd is valid until this point; closed exactly once here.
        unsafe { libc::close(self.fd) };
    }
}
