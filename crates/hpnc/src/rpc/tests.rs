// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC engine integration tests against a simulated device endpoint.

use super::*;
use crate::core::types::{MacAddr, PnUuid, StationName};
use crate::protocol::blocks::{
    build_connect_response, ArBlockRes, ConnectParams, ControlBlock, ExpectedSlot, IoDirection,
    IocrBlockRes, CONTROL_CMD_DONE,
};
use crate::protocol::constants::{
    AR_TYPE_SINGLE, BLOCK_IOX_CONTROL_APP_READY_REQ, IOCR_TYPE_INPUT, IOCR_TYPE_OUTPUT,
    NDR_RESPONSE_HEADER_LEN, RPC_HEADER_LEN, RPC_OPNUM_CONNECT, RPC_OPNUM_CONTROL,
    RPC_PT_FAULT, RPC_PT_REQUEST, RPC_PT_RESPONSE,
};
use crate::protocol::rpc::{detect_ndr, NdrDetect, NdrResponseHeader, RpcHeader};
use crate::core::ser::{Cursor, CursorMut};
use crate::transport::udp::{Endpoint, PairEndpoint};
use crossbeam_channel::unbounded;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DEV_MAC: MacAddr = MacAddr([0x00, 0x0A, 0xCD, 0x01, 0x02, 0x03]);

fn connect_params() -> ConnectParams {
    ConnectParams {
        ar_uuid: PnUuid([0x11; 16]),
        session_key: 1,
        cmi_mac: MacAddr([0x02, 0, 0, 0xAA, 0xBB, 0xCC]),
        cmi_object: PnUuid::object_for_device(1, 0, 0),
        station_name: StationName::parse("hpnc-controller").expect("name"),
        send_clock_factor: 32,
        reduction_ratio: 1,
        watchdog_factor: 3,
        data_hold_factor: 3,
        rta_timeout_factor: 100,
        rta_retries: 3,
        slots: vec![
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
        ],
    }
}

/// Simulated device: answers connect (optionally only in one NDR dialect)
/// and control requests until the endpoint closes.
fn spawn_device(endpoint: PairEndpoint, reject_wrapped: bool) {
    thread::spawn(move || {
        let endpoint = Arc::new(endpoint);
        loop {
            let Ok(Some((packet, peer))) = endpoint.recv_from(Duration::from_millis(500)) else {
                return;
            };
            let mut cursor = Cursor::new(&packet);
            let Ok(header) = RpcHeader::read(&mut cursor) else {
                continue;
            };
            if header.packet_type != RPC_PT_REQUEST {
                continue;
            }
            let body = &packet[cursor.offset()..];
            let detect = detect_ndr(body, false).expect("detectable request body");

            match header.opnum {
                RPC_OPNUM_CONNECT => {
                    if reject_wrapped && matches!(detect, NdrDetect::Wrapped(_)) {
                        send_fault(&endpoint, &header, peer);
                        continue;
                    }
                    let wrapped = matches!(detect, NdrDetect::Wrapped(_));
                    let ar = ArBlockRes {
                        ar_type: AR_TYPE_SINGLE,
                        ar_uuid: PnUuid([0x11; 16]),
                        session_key: header.sequence as u16,
                        device_mac: DEV_MAC,
                        udp_port: crate::config::PN_RPC_PORT,
                    };
                    let iocrs = [
                        IocrBlockRes {
                            iocr_type: IOCR_TYPE_INPUT,
                            iocr_ref: 1,
                            frame_id: 0x8001,
                        },
                        IocrBlockRes {
                            iocr_type: IOCR_TYPE_OUTPUT,
                            iocr_ref: 2,
                            frame_id: 0xC001,
                        },
                    ];
                    let mut block_buf = vec![0u8; 1024];
                    let block_len = build_connect_response(&mut block_buf, &ar, &iocrs, &[])
                        .expect("build connect response");
                    send_response(&endpoint, &header, peer, &block_buf[..block_len], wrapped);
                }
                RPC_OPNUM_CONTROL | RPC_OPNUM_RELEASE_LOCAL => {
                    let wrapped = matches!(detect, NdrDetect::Wrapped(_));
                    let block_body = match detect {
                        NdrDetect::Bare => body,
                        NdrDetect::Wrapped(skip) => &body[skip..],
                    };
                    let Ok(request_block) = ControlBlock::parse(block_body) else {
                        continue;
                    };
                    let response_block = ControlBlock {
                        block_type: request_block.block_type | 0x8000,
                        command: CONTROL_CMD_DONE,
                        ..request_block
                    };
                    let mut block_buf = [0u8; 128];
                    let block_len = response_block
                        .write(&mut block_buf)
                        .expect("write control response");
                    send_response(&endpoint, &header, peer, &block_buf[..block_len], wrapped);
                }
                _ => {}
            }
        }
    });
}

const RPC_OPNUM_RELEASE_LOCAL: u16 = crate::protocol::constants::RPC_OPNUM_RELEASE;

fn send_response(
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
    header.write(&mut cursor).expect("write response header");
    if wrapped {
        NdrResponseHeader::ok(block.len() as u32)
            .write(&mut cursor)
            .expect("write ndr response header");
    }
    cursor.write_bytes(block).expect("write block");
    endpoint.send_to(&out, peer).expect("send response");
}

fn send_fault(endpoint: &Arc<PairEndpoint>, request: &RpcHeader, peer: SocketAddr) {
    let mut header = *request;
    header.packet_type = RPC_PT_FAULT;
    header.fragment_len = 4;
    let mut out = vec![0u8; RPC_HEADER_LEN + 4];
    let mut cursor = CursorMut::new(&mut out);
    header.write(&mut cursor).expect("write fault header");
    cursor.write_u32_le(0xDB81_0000).expect("write status");
    endpoint.send_to(&out, peer).expect("send fault");
}

#[test]
fn test_connect_happy_path_first_strategy() {
    let (ctrl, dev) = PairEndpoint::pair();
    let peer = dev.local_addr().expect("addr");
    spawn_device(dev, false);

    let client = RpcClient::new(Arc::new(ctrl));
    let params = connect_params();
    let (response, strategy) = client
        .connect_with_strategies(
            peer,
            PnUuid::object_for_device(1, 0x0C05, 0x0272),
            PnUuid::IFACE_DEVICE,
            &params,
            &ConnectStrategy::default_list(),
        )
        .expect("connect should succeed");

    assert_eq!(strategy.ndr_mode, NdrMode::Wrapped);
    assert_eq!(
        response.frame_id_for(crate::protocol::constants::IOCR_TYPE_INPUT),
        Some(0x8001)
    );
    assert_eq!(
        response.frame_id_for(crate::protocol::constants::IOCR_TYPE_OUTPUT),
        Some(0xC001)
    );
    assert!(response.alarm_cr_ok);
}

#[test]
fn test_connect_falls_back_to_bare_strategy() {
    let (ctrl, dev) = PairEndpoint::pair();
    let peer = dev.local_addr().expect("addr");
    spawn_device(dev, true);

    let client = RpcClient::new(Arc::new(ctrl));
    let params = connect_params();
    let (_response, strategy) = client
        .connect_with_strategies(
            peer,
            PnUuid::object_for_device(1, 0x0C05, 0x0272),
            PnUuid::IFACE_DEVICE,
            &params,
            &ConnectStrategy::default_list(),
        )
        .expect("connect should fall back and succeed");
    assert_eq!(strategy.ndr_mode, NdrMode::Bare);
}

#[test]
fn test_prm_end_control_roundtrip() {
    let (ctrl, dev) = PairEndpoint::pair();
    let peer = dev.local_addr().expect("addr");
    spawn_device(dev, false);

    let client = RpcClient::new(Arc::new(ctrl));
    let strategy = ConnectStrategy::default_list()[0];
    let response = client
        .control(
            peer,
            PnUuid::object_for_device(1, 0x0C05, 0x0272),
            PnUuid::IFACE_DEVICE,
            ControlBlock::prm_end(PnUuid([0x11; 16]), 1),
            strategy,
        )
        .expect("control should succeed");
    assert_eq!(response.command, CONTROL_CMD_DONE);
    assert_eq!(response.ar_uuid, PnUuid([0x11; 16]));
}

#[test]
fn test_release_roundtrip() {
    let (ctrl, dev) = PairEndpoint::pair();
    let peer = dev.local_addr().expect("addr");
    spawn_device(dev, false);

    let client = RpcClient::new(Arc::new(ctrl));
    let strategy = ConnectStrategy::default_list()[0];
    client
        .release(
            peer,
            PnUuid::object_for_device(1, 0x0C05, 0x0272),
            PnUuid::IFACE_DEVICE,
            PnUuid([0x11; 16]),
            1,
            strategy,
        )
        .expect("release should succeed");
}

#[test]
fn test_server_answers_application_ready() {
    let (ctrl, dev) = PairEndpoint::pair();
    let dev = Arc::new(dev);
    let (events_tx, events_rx) = unbounded();
    let stop = Arc::new(AtomicBool::new(false));
    let server = RpcServer::new(Arc::new(ctrl), events_tx, Arc::clone(&stop));

    // Device fires the ApplicationReady callback.
    let block = ControlBlock {
        block_type: BLOCK_IOX_CONTROL_APP_READY_REQ,
        ar_uuid: PnUuid([0x77; 16]),
        session_key: 3,
        command: crate::protocol::blocks::CONTROL_CMD_APP_READY,
    };
    let mut block_buf = [0u8; 128];
    let block_len = block.write(&mut block_buf).expect("write block");
    let mut header = RpcHeader::request(
        PnUuid([0x01; 16]),
        PnUuid::IFACE_CONTROLLER,
        PnUuid([0xAB; 16]),
        9,
        RPC_OPNUM_CONTROL,
    );
    header.fragment_len = block_len as u16;
    let mut out = vec![0u8; RPC_HEADER_LEN + block_len];
    {
        let mut cursor = CursorMut::new(&mut out);
        header.write(&mut cursor).expect("write header");
        cursor
            .write_bytes(&block_buf[..block_len])
            .expect("write body");
    }
    let peer = "192.168.1.1:34964".parse().expect("addr");
    dev.send_to(&out, peer).expect("send app-ready");

    server
        .poll_once(Duration::from_millis(500))
        .expect("server poll");

    // The AR manager sees the event...
    let event = events_rx.try_recv().expect("server event");
    assert_eq!(event.block.ar_uuid, PnUuid([0x77; 16]));
    assert_eq!(event.block.session_key, 3);

    // ...and the device got the Done echo.
    let (response_packet, _) = dev
        .recv_from(Duration::from_millis(500))
        .expect("device recv")
        .expect("response datagram");
    let mut cursor = Cursor::new(&response_packet);
    let response_header = RpcHeader::read(&mut cursor).expect("response header");
    assert_eq!(response_header.packet_type, RPC_PT_RESPONSE);
    assert_eq!(response_header.sequence, 9);
    let response_block =
        ControlBlock::parse(&response_packet[cursor.offset()..]).expect("response block");
    assert_eq!(response_block.command, CONTROL_CMD_DONE);
    assert_eq!(
        response_block.block_type,
        crate::protocol::constants::BLOCK_IOX_CONTROL_APP_READY_RSP
    );
}
