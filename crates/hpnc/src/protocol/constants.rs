// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IEC 61158-6 numeric constants: block types, DCP options, RPC opnums.
//!
//! Values the codec and the engine share. Frame-id windows and timing
//! constants live in [`crate::config`].

// =======================================================================
// PNIO block types (request window 0x0101-0x010F, response 0x8101-0x810F)
// =======================================================================

/// AR Block request.
pub const BLOCK_AR_REQ: u16 = 0x0101;
/// IOCR Block request.
pub const BLOCK_IOCR_REQ: u16 = 0x0102;
/// Alarm CR Block request.
pub const BLOCK_ALARM_CR_REQ: u16 = 0x0103;
/// Expected Submodule Block request.
pub const BLOCK_EXPECTED_SUBMODULE_REQ: u16 = 0x0104;
/// PrmEnd (IOD control) request.
pub const BLOCK_IOD_CONTROL_PRM_END_REQ: u16 = 0x0110;
/// ApplicationReady (IOX control) request, sent by the device.
pub const BLOCK_IOX_CONTROL_APP_READY_REQ: u16 = 0x0112;
/// Release block request.
pub const BLOCK_RELEASE_REQ: u16 = 0x0114;
/// IOD read request header.
pub const BLOCK_IOD_READ_REQ: u16 = 0x0009;
/// IOD write request header.
pub const BLOCK_IOD_WRITE_REQ: u16 = 0x0008;

/// AR Block response.
pub const BLOCK_AR_RSP: u16 = 0x8101;
/// IOCR Block response.
pub const BLOCK_IOCR_RSP: u16 = 0x8102;
/// Alarm CR Block response.
pub const BLOCK_ALARM_CR_RSP: u16 = 0x8103;
/// Module Difference block (in connect or PrmEnd responses).
pub const BLOCK_MODULE_DIFF: u16 = 0x8104;
/// PrmEnd (IOD control) response.
pub const BLOCK_IOD_CONTROL_PRM_END_RSP: u16 = 0x8110;
/// ApplicationReady (IOX control) response, sent by the controller.
pub const BLOCK_IOX_CONTROL_APP_READY_RSP: u16 = 0x8112;
/// Release block response.
pub const BLOCK_RELEASE_RSP: u16 = 0x8114;
/// IOD read response header.
pub const BLOCK_IOD_READ_RSP: u16 = 0x8009;
/// IOD write response header.
pub const BLOCK_IOD_WRITE_RSP: u16 = 0x8008;

/// Request block-type window used by NDR auto-detection.
pub const BLOCK_REQ_DETECT_MIN: u16 = 0x0101;
pub const BLOCK_REQ_DETECT_MAX: u16 = 0x010F;
/// Response block-type window used by NDR auto-detection.
pub const BLOCK_RSP_DETECT_MIN: u16 = 0x8101;
pub const BLOCK_RSP_DETECT_MAX: u16 = 0x810F;

/// Block version carried in every block header.
pub const BLOCK_VERSION_HIGH: u8 = 0x01;
pub const BLOCK_VERSION_LOW: u8 = 0x00;

// =======================================================================
// AR / IOCR field values
// =======================================================================

/// IOCR AR type: IOCAR single.
pub const AR_TYPE_SINGLE: u16 = 0x0001;
/// Input CR.
pub const IOCR_TYPE_INPUT: u16 = 0x0001;
/// Output CR.
pub const IOCR_TYPE_OUTPUT: u16 = 0x0002;
/// RT Class 1 (Class-2 transport, unsynchronized).
pub const IOCR_RT_CLASS1: u16 = 0x0002;
/// Ethertype the IOCR block announces for RT Class 1.
pub const IOCR_LT_FIELD: u16 = 0x8892;

/// AR properties: supervisor takeover not allowed, controller is
/// parameterization server, single device state.
pub const AR_PROPERTIES_DEFAULT: u32 = 0x0000_0011;

/// IOCR properties for RT Class 1.
pub const IOCR_PROPERTIES_RT_CLASS1: u32 = 0x0000_0001;

/// Alarm CR type.
pub const ALARM_CR_TYPE: u16 = 0x0001;
/// Alarm CR properties: RTA class 1, priority alarm transport.
pub const ALARM_CR_PROPERTIES: u32 = 0x0000_0000;

/// Per-slot provider/consumer status GOOD.
pub const IOXS_GOOD: u8 = 0x80;
/// Per-slot status BAD (by subslot).
pub const IOXS_BAD: u8 = 0x00;

// =======================================================================
// APDU data status bits (RT frame trailer)
// =======================================================================

/// Data status: state bit (primary).
pub const DATA_STATUS_STATE_PRIMARY: u8 = 0x01;
/// Data status: data valid.
pub const DATA_STATUS_VALID: u8 = 0x04;
/// Data status: provider running.
pub const DATA_STATUS_RUN: u8 = 0x10;
/// Data status: no station problem.
pub const DATA_STATUS_OK: u8 = 0x20;
/// Default emitted status: primary + valid + run + ok.
pub const DATA_STATUS_DEFAULT: u8 =
    DATA_STATUS_STATE_PRIMARY | DATA_STATUS_VALID | DATA_STATUS_RUN | DATA_STATUS_OK;

// =======================================================================
// DCE/RPC (IEC 61158-6 Sec. CM RPC)
// =======================================================================

/// RPC protocol version (first header byte).
pub const RPC_VERSION: u8 = 0x04;

/// RPC packet types.
pub const RPC_PT_REQUEST: u8 = 0x00;
pub const RPC_PT_PING: u8 = 0x01;
pub const RPC_PT_RESPONSE: u8 = 0x02;
pub const RPC_PT_FAULT: u8 = 0x03;
pub const RPC_PT_WORKING: u8 = 0x04;
pub const RPC_PT_NOCALL: u8 = 0x05;
pub const RPC_PT_REJECT: u8 = 0x06;
pub const RPC_PT_ACK: u8 = 0x07;

/// Flags1: idempotent bit -- set on all our requests.
pub const RPC_FLAG1_IDEMPOTENT: u8 = 0x20;
/// Flags1: last fragment.
pub const RPC_FLAG1_LAST_FRAG: u8 = 0x02;
/// Flags1: no fragment ack requested.
pub const RPC_FLAG1_NO_FACK: u8 = 0x08;

/// DREP byte 0: little-endian integer representation, ASCII characters.
pub const RPC_DREP_LE_ASCII: u8 = 0x10;

/// Context-Manager operation numbers.
pub const RPC_OPNUM_CONNECT: u16 = 0x0000;
pub const RPC_OPNUM_RELEASE: u16 = 0x0001;
pub const RPC_OPNUM_READ: u16 = 0x0002;
pub const RPC_OPNUM_WRITE: u16 = 0x0003;
pub const RPC_OPNUM_CONTROL: u16 = 0x0004;

/// Serial-high/off marker for the fragment number field family.
pub const RPC_SERIAL_NONE: u8 = 0x00;

/// Size of the fixed DCE/RPC header.
pub const RPC_HEADER_LEN: usize = 80;
/// Size of the little-endian NDR request args header.
pub const NDR_REQUEST_HEADER_LEN: usize = 20;
/// Size of the little-endian NDR response args header.
pub const NDR_RESPONSE_HEADER_LEN: usize = 24;

/// ArgsMaximum we announce in NDR request headers.
pub const NDR_ARGS_MAX: u32 = 16_696;

// =======================================================================
// DCP (IEC 61158-6 Sec. DCP)
// =======================================================================

/// DCP service IDs.
pub const DCP_SERVICE_GET: u8 = 0x03;
pub const DCP_SERVICE_SET: u8 = 0x04;
pub const DCP_SERVICE_IDENTIFY: u8 = 0x05;
pub const DCP_SERVICE_HELLO: u8 = 0x06;

/// DCP service types.
pub const DCP_TYPE_REQUEST: u8 = 0x00;
pub const DCP_TYPE_RESPONSE_SUCCESS: u8 = 0x01;
pub const DCP_TYPE_RESPONSE_UNSUPPORTED: u8 = 0x05;

/// DCP options.
pub const DCP_OPTION_IP: u8 = 0x01;
pub const DCP_OPTION_DEVICE: u8 = 0x02;
pub const DCP_OPTION_CONTROL: u8 = 0x05;
pub const DCP_OPTION_ALL: u8 = 0xFF;

/// Suboptions of DCP_OPTION_IP.
pub const DCP_SUB_IP_MAC: u8 = 0x01;
pub const DCP_SUB_IP_PARAM: u8 = 0x02;

/// Suboptions of DCP_OPTION_DEVICE.
pub const DCP_SUB_DEV_VENDOR: u8 = 0x01;
pub const DCP_SUB_DEV_NAME_OF_STATION: u8 = 0x02;
pub const DCP_SUB_DEV_ID: u8 = 0x03;
pub const DCP_SUB_DEV_ROLE: u8 = 0x04;
pub const DCP_SUB_DEV_OPTIONS: u8 = 0x05;

/// Suboptions of DCP_OPTION_CONTROL.
pub const DCP_SUB_CTRL_START: u8 = 0x01;
pub const DCP_SUB_CTRL_STOP: u8 = 0x02;
pub const DCP_SUB_CTRL_SIGNAL: u8 = 0x03;
pub const DCP_SUB_CTRL_RESPONSE: u8 = 0x04;
pub const DCP_SUB_CTRL_FACTORY_RESET: u8 = 0x05;

/// Suboption of DCP_OPTION_ALL for identify-all.
pub const DCP_SUB_ALL: u8 = 0xFF;

/// BlockQualifier: save value permanently.
pub const DCP_QUALIFIER_PERMANENT: u16 = 0x0001;
/// BlockQualifier: temporary value.
pub const DCP_QUALIFIER_TEMPORARY: u16 = 0x0000;

/// Signal value: flash once (link LED).
pub const DCP_SIGNAL_FLASH_ONCE: u16 = 0x0100;

/// DCP block error codes (from set responses).
pub const DCP_ERROR_NONE: u8 = 0x00;
pub const DCP_ERROR_OPTION_UNSUPPORTED: u8 = 0x01;
pub const DCP_ERROR_SUBOPTION_UNSUPPORTED: u8 = 0x02;
pub const DCP_ERROR_SUBOPTION_NOT_SET: u8 = 0x03;
pub const DCP_ERROR_RESOURCE: u8 = 0x04;
pub const DCP_ERROR_SET_NOT_POSSIBLE: u8 = 0x06;

/// Default identify response-delay window devices spread answers over.
pub const DCP_RESPONSE_DELAY_DEFAULT: u16 = 0x0080;
