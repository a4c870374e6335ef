// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simulated RTU for end-to-end tests: answers the Context-Manager RPC
//! sequence, fires the ApplicationReady callback, and produces cyclic
//! input frames on the loopback link.

// Each test binary uses a subset of the harness.
#![allow(dead_code)]

use hpnc::config::PN_ETHERTYPE;
use hpnc::core::ser::{Cursor, CursorMut};
use hpnc::core::types::{IpParams, MacAddr, PnUuid};
use hpnc::discovery::DeviceInfo;
use hpnc::protocol::blocks::{
    build_connect_response, ArBlockRes, ControlBlock, ExpectedSlot, IoDirection, IocrBlockRes,
    CONTROL_CMD_APP_READY, CONTROL_CMD_DONE,
};
use hpnc::protocol::constants::{
    AR_TYPE_SINGLE, BLOCK_IOX_CONTROL_APP_READY_REQ, DATA_STATUS_DEFAULT, IOCR_TYPE_INPUT,
    IOCR_TYPE_OUTPUT, IOXS_GOOD, NDR_RESPONSE_HEADER_LEN, RPC_HEADER_LEN, RPC_OPNUM_CONNECT,
    RPC_OPNUM_CONTROL, RPC_OPNUM_RELEASE, RPC_PT_REQUEST, RPC_PT_RESPONSE,
};
use hpnc::protocol::frame::{build_rt_frame, ApduStatus};
use hpnc::protocol::rpc::{detect_ndr, NdrDetect, NdrResponseHeader, RpcHeader};
use hpnc::transport::udp::{Endpoint, PairEndpoint};
use hpnc::transport::Link;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const CTRL_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0xAA, 0xBB, 0xCC]);
pub const DEV_MAC: MacAddr = MacAddr([0x00, 0x0A, 0xCD, 0x01, 0x02, 0x03]);
pub const INPUT_FRAME_ID: u16 = 0x8001;
pub const OUTPUT_FRAME_ID: u16 = 0xC001;

pub fn device_info() -> DeviceInfo {
    DeviceInfo {
        station_name: "intake-rtu-01".into(),
        vendor_id: 0x0272,
        device_id: 0x0C05,
        mac: DEV_MAC,
        ip: IpParams::new([192, 168, 1, 50], [255, 255, 255, 0], [192, 168, 1, 1]),
        last_seen: Instant::now(),
    }
}

/// Two input slots (4 bytes each), one output slot (4 bytes) -- the
/// connect scenario of the acceptance suite.
pub fn standard_slots() -> Vec<ExpectedSlot> {
    vec![
        ExpectedSlot {
            slot: 1,
            subslot: 1,
            module_ident: 0x30,
            submodule_ident: 0x01,
            direction: IoDirection::Input,
            data_length: 4,
        },
        ExpectedSlot {
            slot: 2,
            subslot: 1,
            module_ident: 0x30,
            submodule_ident: 0x01,
            direction: IoDirection::Input,
            data_length: 4,
        },
        ExpectedSlot {
            slot: 3,
            subslot: 1,
            module_ident: 0x31,
            submodule_ident: 0x02,
            direction: IoDirection::Output,
            data_length: 4,
        },
    ]
}

/// Device-side RPC responder.
///
/// Answers connect and release; a PrmEnd control response is followed by
/// the ApplicationReady request on the controller's server endpoint.
pub struct SimulatedRtu {
    pub stop: Arc<AtomicBool>,
    /// Cycle counter of the cyclic input producer.
    pub counter: Arc<AtomicU16>,
    /// When false, the producer keeps sending but freezes the counter.
    pub advance_counter: Arc<AtomicBool>,
    /// When false, the producer stops emitting frames entirely.
    pub emit_input: Arc<AtomicBool>,
}

impl SimulatedRtu {
    pub fn spawn(
        device_client_side: PairEndpoint,
        device_server_side: PairEndpoint,
    ) -> SimulatedRtu {
        let stop = Arc::new(AtomicBool::new(false));
        let rtu = SimulatedRtu {
            stop: Arc::clone(&stop),
            counter: Arc::new(AtomicU16::new(0)),
            advance_counter: Arc::new(AtomicBool::new(true)),
            emit_input: Arc::new(AtomicBool::new(true)),
        };

        thread::spawn(move || {
            let client_side = Arc::new(device_client_side);
            let server_side = Arc::new(device_server_side);
            while !stop.load(Ordering::Acquire) {
                let Ok(Some((packet, peer))) = client_side.recv_from(Duration::from_millis(50))
                else {
                    continue;
                };
                let mut cursor = Cursor::new(&packet);
                let Ok(header) = RpcHeader::read(&mut cursor) else {
                    continue;
                };
                if header.packet_type != RPC_PT_REQUEST {
                    continue;
                }
                let body = &packet[cursor.offset()..];
                let Ok(detect) = detect_ndr(body, false) else {
                    continue;
                };
                let wrapped = matches!(detect, NdrDetect::Wrapped(_));
                let block_body = match detect {
                    NdrDetect::Bare => body,
                    NdrDetect::Wrapped(skip) => &body[skip..],
                };

                match header.opnum {
                    RPC_OPNUM_CONNECT => {
                        let ar = ArBlockRes {
                            ar_type: AR_TYPE_SINGLE,
                            ar_uuid: connect_ar_uuid(block_body),
                            session_key: 1,
                            device_mac: DEV_MAC,
                            udp_port: hpnc::config::PN_RPC_PORT,
                        };
                        let iocrs = [
                            IocrBlockRes {
                                iocr_type: IOCR_TYPE_INPUT,
                                iocr_ref: 1,
                                frame_id: INPUT_FRAME_ID,
                            },
                            IocrBlockRes {
                                iocr_type: IOCR_TYPE_OUTPUT,
                                iocr_ref: 2,
                                frame_id: OUTPUT_FRAME_ID,
                            },
                        ];
                        let mut buf = vec![0u8; 1024];
                        let len = build_connect_response(&mut buf, &ar, &iocrs, &[])
                            .expect("connect response");
                        respond(&client_side, &header, peer, &buf[..len], wrapped);
                    }
                    RPC_OPNUM_CONTROL => {
                        let Ok(request) = ControlBlock::parse(block_body) else {
                            continue;
                        };
                        let response = ControlBlock {
                            block_type: request.block_type | 0x8000,
                            command: CONTROL_CMD_DONE,
                            ..request
                        };
                        let mut buf = [0u8; 128];
                        let len = response.write(&mut buf).expect("control response");
                        respond(&client_side, &header, peer, &buf[..len], wrapped);

                        // PrmEnd done -> fire ApplicationReady at the
                        // controller's server socket.
                        send_app_ready(&server_side, request.ar_uuid, request.session_key);
                    }
                    RPC_OPNUM_RELEASE => {
                        let Ok(request) = ControlBlock::parse(block_body) else {
                            continue;
                        };
                        let response = ControlBlock {
                            block_type: request.block_type | 0x8000,
                            command: CONTROL_CMD_DONE,
                            ..request
                        };
                        let mut buf = [0u8; 128];
                        let len = response.write(&mut buf).expect("release response");
                        respond(&client_side, &header, peer, &buf[..len], wrapped);
                    }
                    _ => {}
                }
            }
        });
        rtu
    }

    /// Produce cyclic input frames on the device link until stopped.
    pub fn start_cyclic_input(&self, device_link: Arc<dyn Link>, period: Duration) {
        let stop = Arc::clone(&self.stop);
        let counter = Arc::clone(&self.counter);
        let advance = Arc::clone(&self.advance_counter);
        let emit = Arc::clone(&self.emit_input);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                if emit.load(Ordering::Acquire) {
                    let value = counter.load(Ordering::Acquire);
                    let payload = input_payload(f32::from(value), f32::from(value) * 0.5);
                    let mut wire = [0u8; 128];
                    let len = build_rt_frame(
                        &mut wire,
                        CTRL_MAC,
                        DEV_MAC,
                        INPUT_FRAME_ID,
                        &payload,
                        ApduStatus {
                            cycle_counter: value,
                            data_status: DATA_STATUS_DEFAULT,
                            transfer_status: 0,
                        },
                    )
                    .expect("input frame");
                    let _ = device_link.send_frame(&wire[..len]);
                    if advance.load(Ordering::Acquire) {
                        counter.fetch_add(32, Ordering::AcqRel);
                    }
                }
                thread::sleep(period);
            }
        });
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Input C_SDU for the standard slot set: two f32 values with good IOPS,
/// one IOCS.
pub fn input_payload(v1: f32, v2: f32) -> Vec<u8> {
    let mut payload = vec![0u8; 11];
    payload[0..4].copy_from_slice(&v1.to_be_bytes());
    payload[4] = IOXS_GOOD;
    payload[5..9].copy_from_slice(&v2.to_be_bytes());
    payload[9] = IOXS_GOOD;
    payload[10] = IOXS_GOOD;
    payload
}

/// Build one input RT frame (for synthetically-timed tests).
pub fn input_frame(cycle_counter: u16, v1: f32, v2: f32) -> Vec<u8> {
    let payload = input_payload(v1, v2);
    let mut wire = vec![0u8; 128];
    let len = build_rt_frame(
        &mut wire,
        CTRL_MAC,
        DEV_MAC,
        INPUT_FRAME_ID,
        &payload,
        ApduStatus {
            cycle_counter,
            data_status: DATA_STATUS_DEFAULT,
            transfer_status: 0,
        },
    )
    .expect("input frame");
    wire.truncate(len);
    wire
}

/// Pull the AR UUID back out of a connect request body (first block).
fn connect_ar_uuid(block_body: &[u8]) -> PnUuid {
    // AR block: type(2) len(2) ver(2) ar_type(2) then the UUID.
    let mut cursor = Cursor::new(block_body);
    let _ = cursor.skip(8);
    PnUuid::read(&mut cursor).unwrap_or_default()
}

fn respond(
    endpoint: &Arc<PairEndpoint>,
    request: &RpcHeader,
    peer: SocketAddr,
    block: &[u8],
    wrapped: bool,
) {
    let ndr_len = if wrapped { NDR_RESPONSE_HEADER_LEN } else { 0 };
    let mut header = *request;
    header.packet_type = RPC_PT_RESPONSE;
    header.fragment_len = (ndr_len + block.len()) as u16;

    let mut out = vec![0u8; RPC_HEADER_LEN + ndr_len + block.len()];
    let mut cursor = CursorMut::new(&mut out);
    header.write(&mut cursor).expect("response header");
    if wrapped {
        NdrResponseHeader::ok(block.len() as u32)
            .write(&mut cursor)
            .expect("ndr response header");
    }
    cursor.write_bytes(block).expect("response block");
    endpoint.send_to(&out, peer).expect("send response");
}

fn send_app_ready(endpoint: &Arc<PairEndpoint>, ar_uuid: PnUuid, session_key: u16) {
    let block = ControlBlock {
        block_type: BLOCK_IOX_CONTROL_APP_READY_REQ,
        ar_uuid,
        session_key,
        command: CONTROL_CMD_APP_READY,
    };
    let mut block_buf = [0u8; 128];
    let block_len = block.write(&mut block_buf).expect("app-ready block");

    let mut header = RpcHeader::request(
        PnUuid([0x0D; 16]),
        PnUuid::IFACE_CONTROLLER,
        PnUuid([0xDA; 16]),
        1,
        RPC_OPNUM_CONTROL,
    );
    header.fragment_len = block_len as u16;
    let mut out = vec![0u8; RPC_HEADER_LEN + block_len];
    let mut cursor = CursorMut::new(&mut out);
    header.write(&mut cursor).expect("app-ready header");
    cursor
        .write_bytes(&block_buf[..block_len])
        .expect("app-ready body");
    let peer: SocketAddr = "192.168.1.1:34964".parse().expect("literal addr");
    let _ = endpoint.send_to(&out, peer);
}

/// Assert a frame is a PROFINET frame carrying the given frame-id.
pub fn assert_frame_id(raw: &[u8], expected: u16) {
    let mut cursor = Cursor::new(raw);
    cursor.skip(12).expect("eth header");
    assert_eq!(cursor.read_u16_be().expect("ethertype"), PN_ETHERTYPE);
    assert_eq!(cursor.read_u16_be().expect("frame id"), expected);
}
