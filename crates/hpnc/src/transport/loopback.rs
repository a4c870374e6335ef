// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory link pair for deterministic tests.
//!
//! Two [`LoopbackLink`]s connected back to back: what one side sends, the
//! other polls. Multicast/broadcast destinations are delivered like unicast;
//! there is exactly one peer on the segment.

use super::{EthFrame, Link, LinkError, LinkResult};
use crate::core::types::MacAddr;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// One endpoint of an in-memory Ethernet segment.
pub struct LoopbackLink {
    mac: MacAddr,
    tx: Sender<EthFrame>,
    rx: Receiver<EthFrame>,
}

impl LoopbackLink {
    /// Create a connected pair (controller side, device side).
    pub fn pair(mac_a: MacAddr, mac_b: MacAddr) -> (LoopbackLink, LoopbackLink) {
        let (tx_ab, rx_ab) = bounded(1024);
        let (tx_ba, rx_ba) = bounded(1024);
        (
            LoopbackLink {
                mac: mac_a,
                tx: tx_ab,
                rx: rx_ba,
            },
            LoopbackLink {
                mac: mac_b,
                tx: tx_ba,
                rx: rx_ab,
            },
        )
    }
}

impl Link for LoopbackLink {
    fn send_frame(&self, frame: &[u8]) -> LinkResult<()> {
        self.tx
            .try_send(EthFrame {
                data: frame.to_vec(),
            })
            .map_err(|_| LinkError::Disconnected)
    }

    fn poll(&self, timeout: Duration) -> LinkResult<Option<EthFrame>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Disconnected),
        }
    }

    fn local_mac(&self) -> MacAddr {
        self.mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC_A: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0xA1]);
    const MAC_B: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0xB2]);

    #[test]
    fn test_pair_delivers_both_ways() {
        let (a, b) = LoopbackLink::pair(MAC_A, MAC_B);
        a.send_frame(&[1, 2, 3]).expect("send a->b");
        b.send_frame(&[4, 5]).expect("send b->a");

        let at_b = b
            .poll(Duration::from_millis(100))
            .expect("poll b")
            .expect("frame at b");
        assert_eq!(at_b.data, vec![1, 2, 3]);

        let at_a = a
            .poll(Duration::from_millis(100))
            .expect("poll a")
            .expect("frame at a");
        assert_eq!(at_a.data, vec![4, 5]);
    }

    #[test]
    fn test_poll_times_out_empty() {
        let (a, _b) = LoopbackLink::pair(MAC_A, MAC_B);
        let got = a.poll(Duration::from_millis(10)).expect("poll");
        assert!(got.is_none());
    }

    #[test]
    fn test_dropped_peer_disconnects() {
        let (a, b) = LoopbackLink::pair(MAC_A, MAC_B);
        drop(b);
        assert!(matches!(
            a.poll(Duration::from_millis(10)),
            Err(LinkError::Disconnected)
        ));
        assert!(a.send_frame(&[0]).is_err());
    }
}
