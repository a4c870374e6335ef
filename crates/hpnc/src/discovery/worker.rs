// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DCP worker: identify-all, set-name, set-ip, signal.
//!
//! The worker sends through the link and receives through an inbox channel
//! fed by the frame demultiplexer (everything in the DCP frame-id window).
//! Identify responses update the device cache; set operations wait for the
//! matching control response by xid.

use super::cache::{DeviceCache, DeviceInfo};
use super::{DcpError, DcpResult};
use crate::config::{
    DCP_MULTICAST, FRAME_ID_DCP_GETSET, FRAME_ID_DCP_IDENT_REQ, PN_ETHERTYPE,
};
use crate::core::types::{IpParams, MacAddr, StationName};
use crate::protocol::constants::{
    DCP_ERROR_NONE, DCP_SERVICE_IDENTIFY, DCP_SERVICE_SET, DCP_TYPE_REQUEST,
};
use crate::protocol::dcp::{self, DcpBlock};
use crate::protocol::frame::EthHeader;
use crate::core::ser::{Cursor, CursorMut};
use crate::transport::{EthFrame, Link};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Unicast set operations wait this long for the control response.
const SET_TIMEOUT: Duration = Duration::from_secs(1);

pub struct DcpWorker {
    link: Arc<dyn Link>,
    cache: Arc<DeviceCache>,
    /// DCP-window frames routed here by the demultiplexer.
    inbox: Receiver<EthFrame>,
    xid: AtomicU32,
}

impl DcpWorker {
    pub fn new(link: Arc<dyn Link>, cache: Arc<DeviceCache>, inbox: Receiver<EthFrame>) -> Self {
        Self {
            link,
            cache,
            inbox,
            // Xids only need to differ between in-flight operations; seed
            // from a fixed base so captures line up between runs.
            xid: AtomicU32::new(0x0100_0000),
        }
    }

    fn next_xid(&self) -> u32 {
        self.xid.fetch_add(1, Ordering::Relaxed)
    }

    fn send_dcp(&self, dst: MacAddr, frame_id: u16, pdu: &[u8]) -> DcpResult<()> {
        let mut frame = [0u8; 1500];
        let mut cursor = CursorMut::new(&mut frame);
        EthHeader::new(dst, self.link.local_mac(), PN_ETHERTYPE).write(&mut cursor)?;
        cursor.write_u16_be(frame_id)?;
        cursor.write_bytes(pdu)?;
        let mut len = cursor.offset();
        // Minimum Ethernet frame length.
        while len < 60 {
            cursor.write_u8(0)?;
            len += 1;
        }
        self.link.send_frame(&frame[..len])?;
        Ok(())
    }

    /// Broadcast identify-all and fold responses into the cache for the
    /// duration of `window`. Returns the devices that answered this round.
    pub fn identify_all(&self, window: Duration) -> DcpResult<Vec<DeviceInfo>> {
        let xid = self.next_xid();
        let mut pdu = [0u8; 64];
        let len = dcp::build_identify_all(&mut pdu, xid)?;
        self.send_dcp(DCP_MULTICAST, FRAME_ID_DCP_IDENT_REQ, &pdu[..len])?;
        log::debug!("[Dcp] identify-all xid={:#010x} window={:?}", xid, window);

        let deadline = Instant::now() + window;
        let mut found = Vec::new();
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.inbox.recv_timeout(deadline - now) {
                Ok(frame) => {
                    if let Some(info) = self.handle_identify_response(&frame, xid) {
                        found.push(info);
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Err(DcpError::Link(
                    crate::transport::LinkError::Disconnected,
                )),
            }
        }
        log::info!("[Dcp] identify-all complete responders={}", found.len());
        Ok(found)
    }

    fn handle_identify_response(&self, frame: &EthFrame, xid: u32) -> Option<DeviceInfo> {
        let (src_mac, pdu) = match split_dcp(&frame.data) {
            Some(parts) => parts,
            None => return None,
        };
        let packet = match dcp::parse_dcp(pdu) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("[Dcp] dropping malformed identify response: {}", e);
                return None;
            }
        };
        if packet.header.service_id != DCP_SERVICE_IDENTIFY
            || packet.header.service_type == DCP_TYPE_REQUEST
            || packet.header.xid != xid
        {
            return None;
        }

        let mut name = None;
        let mut vendor_id = 0u16;
        let mut device_id = 0u16;
        let mut ip = IpParams::default();
        for block in &packet.blocks {
            match block {
                DcpBlock::NameOfStation { name: n, .. } => name = Some(n.clone()),
                DcpBlock::DeviceId {
                    vendor_id: v,
                    device_id: d,
                    ..
                } => {
                    vendor_id = *v;
                    device_id = *d;
                }
                DcpBlock::IpParam { params, .. } => ip = *params,
                _ => {}
            }
        }

        let station_name = name?;
        let info = DeviceInfo {
            station_name,
            vendor_id,
            device_id,
            mac: src_mac,
            ip,
            last_seen: Instant::now(),
        };
        log::debug!(
            "[Dcp] responder station={} vendor={:#06x} device={:#06x} mac={} ip={}",
            info.station_name,
            info.vendor_id,
            info.device_id,
            info.mac,
            info.ip
        );
        self.cache.upsert(info.clone());
        Some(info)
    }

    /// Unicast set of the station name; waits for the confirmation.
    pub fn set_name(&self, target: MacAddr, name: &StationName, permanent: bool) -> DcpResult<()> {
        let xid = self.next_xid();
        let mut pdu = [0u8; 512];
        let len = dcp::build_set_name(&mut pdu, xid, name, permanent)?;
        self.send_dcp(target, FRAME_ID_DCP_GETSET, &pdu[..len])?;
        log::debug!("[Dcp] set-name target={} name={} xid={:#010x}", target, name, xid);
        self.await_set_response(xid)
    }

    /// Unicast set of the IP parameter block; waits for the confirmation.
    pub fn set_ip(&self, target: MacAddr, params: &IpParams, permanent: bool) -> DcpResult<()> {
        let xid = self.next_xid();
        let mut pdu = [0u8; 64];
        let len = dcp::build_set_ip(&mut pdu, xid, params, permanent)?;
        self.send_dcp(target, FRAME_ID_DCP_GETSET, &pdu[..len])?;
        log::debug!("[Dcp] set-ip target={} ip={} xid={:#010x}", target, params, xid);
        self.await_set_response(xid)
    }

    /// Flash the device link LED for field identification.
    pub fn signal(&self, target: MacAddr) -> DcpResult<()> {
        let xid = self.next_xid();
        let mut pdu = [0u8; 64];
        let len = dcp::build_signal(&mut pdu, xid)?;
        self.send_dcp(target, FRAME_ID_DCP_GETSET, &pdu[..len])?;
        self.await_set_response(xid)
    }

    fn await_set_response(&self, xid: u32) -> DcpResult<()> {
        let deadline = Instant::now() + SET_TIMEOUT;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(DcpError::Timeout);
            }
            let frame = match self.inbox.recv_timeout(deadline - now) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => return Err(DcpError::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(DcpError::Link(crate::transport::LinkError::Disconnected))
                }
            };
            let Some((_, pdu)) = split_dcp(&frame.data) else {
                continue;
            };
            let packet = match dcp::parse_dcp(pdu) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if packet.header.service_id != DCP_SERVICE_SET
                || packet.header.service_type == DCP_TYPE_REQUEST
                || packet.header.xid != xid
            {
                continue;
            }
            for block in &packet.blocks {
                if let DcpBlock::ControlResponse { error, .. } = block {
                    if *error == DCP_ERROR_NONE {
                        return Ok(());
                    }
                    return Err(DcpError::Rejected(*error));
                }
            }
            // Response without a control block: treat as success (some
            // stacks confirm implicitly).
            return Ok(());
        }
    }
}

/// Split a raw Ethernet frame into (source MAC, DCP PDU after the frame-id).
fn split_dcp(raw: &[u8]) -> Option<(MacAddr, &[u8])> {
    let mut cursor = Cursor::new(raw);
    let header = EthHeader::read(&mut cursor).ok()?;
    if header.ethertype != PN_ETHERTYPE {
        return None;
    }
    let _frame_id = cursor.read_u16_be().ok()?;
    let offset = cursor.offset();
    Some((header.src, &raw[offset..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagHub;
    use crate::protocol::dcp::{build_control_response, build_identify_response, IdentifyResponse};
    use crate::config::FRAME_ID_DCP_IDENT_RSP;
    use crate::transport::loopback::LoopbackLink;
    use crossbeam_channel::unbounded;
    use std::thread;

    const CTRL_MAC: MacAddr = MacAddr([0x02, 0, 0, 0xAA, 0xBB, 0xCC]);
    const DEV_MAC: MacAddr = MacAddr([0x00, 0x0A, 0xCD, 0x01, 0x02, 0x03]);

    fn dcp_eth(dst: MacAddr, src: MacAddr, frame_id: u16, pdu: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 60.max(16 + pdu.len())];
        let mut cursor = CursorMut::new(&mut frame);
        EthHeader::new(dst, src, PN_ETHERTYPE)
            .write(&mut cursor)
            .expect("eth header");
        cursor.write_u16_be(frame_id).expect("frame id");
        cursor.write_bytes(pdu).expect("pdu");
        frame
    }

    /// Device-side loop: answer one identify request, then stop.
    fn spawn_identify_responder(device_link: Arc<dyn Link>, response: IdentifyResponse) {
        thread::spawn(move || {
            let frame = device_link
                .poll(Duration::from_secs(1))
                .expect("device poll")
                .expect("identify request");
            let (_, pdu) = split_dcp(&frame.data).expect("dcp frame");
            let packet = dcp::parse_dcp(pdu).expect("identify request parses");
            let mut out = [0u8; 512];
            let len = build_identify_response(&mut out, packet.header.xid, &response)
                .expect("build response");
            let eth = dcp_eth(CTRL_MAC, response.mac, FRAME_ID_DCP_IDENT_RSP, &out[..len]);
            device_link.send_frame(&eth).expect("send response");
        });
    }

    fn worker_with_pump(
        controller: LoopbackLink,
    ) -> (DcpWorker, Arc<DeviceCache>, Arc<dyn Link>) {
        let link: Arc<dyn Link> = Arc::new(controller);
        let cache = Arc::new(DeviceCache::new(Duration::ZERO, Arc::new(DiagHub::new())));
        let (tx, rx) = unbounded();
        // Pump thread standing in for the engine demultiplexer.
        let pump_link = Arc::clone(&link);
        thread::spawn(move || loop {
            match pump_link.poll(Duration::from_millis(50)) {
                Ok(Some(frame)) => {
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => continue,
                Err(_) => break,
            }
        });
        let worker = DcpWorker::new(Arc::clone(&link), Arc::clone(&cache), rx);
        (worker, cache, link)
    }

    #[test]
    fn test_identify_on_empty_network() {
        let (controller, _device) = LoopbackLink::pair(CTRL_MAC, DEV_MAC);
        let (worker, cache, _link) = worker_with_pump(controller);
        let found = worker
            .identify_all(Duration::from_millis(100))
            .expect("identify should not error");
        assert!(found.is_empty());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_identify_with_one_responder() {
        let (controller, device) = LoopbackLink::pair(CTRL_MAC, DEV_MAC);
        let device: Arc<dyn Link> = Arc::new(device);
        let response = IdentifyResponse {
            name: "intake-rtu-01".into(),
            vendor_id: 0x0272,
            device_id: 0x0C05,
            mac: DEV_MAC,
            ip: IpParams::new([192, 168, 1, 50], [255, 255, 255, 0], [192, 168, 1, 1]),
        };
        spawn_identify_responder(Arc::clone(&device), response);

        let (worker, cache, _link) = worker_with_pump(controller);
        let found = worker
            .identify_all(Duration::from_millis(500))
            .expect("identify");
        assert_eq!(found.len(), 1);
        assert_eq!(cache.len(), 1);
        let info = cache.get("intake-rtu-01").expect("cached");
        assert_eq!(info.vendor_id, 0x0272);
        assert_eq!(info.device_id, 0x0C05);
        assert_eq!(info.mac, DEV_MAC);
        assert_eq!(info.ip.addr, [192, 168, 1, 50]);
    }

    #[test]
    fn test_set_name_confirmed() {
        let (controller, device) = LoopbackLink::pair(CTRL_MAC, DEV_MAC);
        let device: Arc<dyn Link> = Arc::new(device);
        let responder = Arc::clone(&device);
        thread::spawn(move || {
            let frame = responder
                .poll(Duration::from_secs(1))
                .expect("poll")
                .expect("set request");
            let (_, pdu) = split_dcp(&frame.data).expect("dcp");
            let packet = dcp::parse_dcp(pdu).expect("set parses");
            let mut out = [0u8; 64];
            let len = build_control_response(
                &mut out,
                packet.header.xid,
                crate::protocol::constants::DCP_OPTION_DEVICE,
                crate::protocol::constants::DCP_SUB_DEV_NAME_OF_STATION,
                DCP_ERROR_NONE,
            )
            .expect("build control response");
            let eth = dcp_eth(CTRL_MAC, DEV_MAC, FRAME_ID_DCP_GETSET, &out[..len]);
            responder.send_frame(&eth).expect("send");
        });

        let (worker, _cache, _link) = worker_with_pump(controller);
        let name = StationName::parse("intake-rtu-01").expect("name");
        worker
            .set_name(DEV_MAC, &name, true)
            .expect("set-name should be confirmed");
    }

    #[test]
    fn test_set_name_rejected_surfaces_code() {
        let (controller, device) = LoopbackLink::pair(CTRL_MAC, DEV_MAC);
        let device: Arc<dyn Link> = Arc::new(device);
        let responder = Arc::clone(&device);
        thread::spawn(move || {
            let frame = responder
                .poll(Duration::from_secs(1))
                .expect("poll")
                .expect("set request");
            let (_, pdu) = split_dcp(&frame.data).expect("dcp");
            let packet = dcp::parse_dcp(pdu).expect("set parses");
            let mut out = [0u8; 64];
            let len = build_control_response(
                &mut out,
                packet.header.xid,
                crate::protocol::constants::DCP_OPTION_IP,
                crate::protocol::constants::DCP_SUB_IP_PARAM,
                crate::protocol::constants::DCP_ERROR_SET_NOT_POSSIBLE,
            )
            .expect("build control response");
            let eth = dcp_eth(CTRL_MAC, DEV_MAC, FRAME_ID_DCP_GETSET, &out[..len]);
            responder.send_frame(&eth).expect("send");
        });

        let (worker, _cache, _link) = worker_with_pump(controller);
        let params = IpParams::new([192, 168, 1, 51], [255, 255, 255, 0], [0, 0, 0, 0]);
        match worker.set_ip(DEV_MAC, &params, false) {
            Err(DcpError::Rejected(code)) => {
                assert_eq!(code, crate::protocol::constants::DCP_ERROR_SET_NOT_POSSIBLE)
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_set_times_out_without_responder() {
        let (controller, _device) = LoopbackLink::pair(CTRL_MAC, DEV_MAC);
        let (worker, _cache, _link) = worker_with_pump(controller);
        let name = StationName::parse("intake-rtu-01").expect("name");
        assert!(matches!(
            worker.set_name(DEV_MAC, &name, true),
            Err(DcpError::Timeout)
        ));
    }
}
