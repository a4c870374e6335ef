// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! AR manager: arena of per-device state machines.
//!
//! The manager owns every AR's IOCR buffers. The cyclic scheduler pulls
//! output frames and pushes input frames through it; the RPC server's
//! ApplicationReady events land here; the coordinator drives connect,
//! release and retry. All mutation happens under one short-lived lock.

use super::iocr::Iocr;
use super::{ArId, ArState};
use crate::config::CycleTiming;
use crate::core::types::{IpParams, MacAddr, PnUuid};
use crate::diag::{DiagCode, DiagEvent, DiagHub, DiagSeverity};
use crate::discovery::DeviceInfo;
use crate::protocol::blocks::{ConnectParams, ControlBlock, ExpectedSlot, IoDirection};
use crate::protocol::constants::{IOCR_TYPE_INPUT, IOCR_TYPE_OUTPUT, IOXS_GOOD};
use crate::rpc::{ConnectStrategy, RpcClient, RpcError, RpcResult};
use crate::core::ser::{SerError, SerResult};
use crate::core::types::StationName;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// REL_SENT falls through to CLOSED after this long without an ack.
const REL_FALLBACK: Duration = Duration::from_secs(3);

struct ArEntry {
    id: ArId,
    station_name: String,
    state: ArState,
    ar_uuid: PnUuid,
    session_key: u16,
    vendor_id: u16,
    device_id: u16,
    device_mac: MacAddr,
    device_ip: IpParams,
    timing: CycleTiming,
    slots: Vec<ExpectedSlot>,
    /// Dialect that worked at connect; reused for every later exchange.
    strategy: Option<ConnectStrategy>,
    input: Option<Iocr>,
    output: Option<Iocr>,
    /// Our transmit cycle counter (send-clock units).
    tx_cycle_counter: u16,
    last_rx_counter: Option<u16>,
    /// Refreshed whenever the received counter advances.
    last_counter_advance: Option<Instant>,
    last_input: Option<Instant>,
    rel_sent_at: Option<Instant>,
    fault_since: Option<Instant>,
}

impl ArEntry {
    fn watchdog(&self) -> Duration {
        self.timing.watchdog_period()
    }
}

/// One frame's worth of output, handed to the cyclic sender.
#[derive(Debug, Clone)]
pub struct OutputFrame {
    pub ar: ArId,
    pub dst: MacAddr,
    pub frame_id: u16,
    pub payload: Vec<u8>,
    pub cycle_counter: u16,
}

/// Read-only AR summary for the registry and the shared-state writer.
#[derive(Debug, Clone)]
pub struct ArSummary {
    pub id: ArId,
    pub station_name: String,
    pub state: ArState,
    pub device_ip: IpParams,
    pub last_input_age: Option<Duration>,
    pub fault_since: Option<Instant>,
}

pub struct ArManager {
    arena: RwLock<Vec<Option<ArEntry>>>,
    generations: RwLock<Vec<u16>>,
    /// Input frame-id -> AR handle, maintained on connect/close.
    demux: RwLock<HashMap<u16, ArId>>,
    client: Arc<RpcClient>,
    diag: Arc<DiagHub>,
    strategies: Vec<ConnectStrategy>,
    session_counter: RwLock<u16>,
}

impl ArManager {
    pub fn new(client: Arc<RpcClient>, diag: Arc<DiagHub>) -> Self {
        Self {
            arena: RwLock::new(Vec::new()),
            generations: RwLock::new(Vec::new()),
            demux: RwLock::new(HashMap::new()),
            client,
            diag,
            strategies: ConnectStrategy::default_list(),
            session_counter: RwLock::new(1),
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<ConnectStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    // ===== Creation / lookup =====

    /// Create an AR in PRIMED for a device.
    ///
    /// At most one AR exists per station name: an existing live AR for the
    /// same name is released (or force-closed) first.
    pub fn create_ar(
        &self,
        device: &DeviceInfo,
        slots: Vec<ExpectedSlot>,
        timing: CycleTiming,
    ) -> SerResult<ArId> {
        if let Some(existing) = self.find_by_station(&device.station_name) {
            log::warn!(
                "[ArManager] second AR requested for station={}, releasing {} first",
                device.station_name,
                existing
            );
            self.release(existing);
            self.remove_closed(existing);
        }

        timing.validate().map_err(|reason| SerError::InvalidData { reason })?;

        let session_key = {
            let mut counter = self.session_counter.write();
            let key = *counter;
            *counter = counter.wrapping_add(1).max(1);
            key
        };

        let mut arena = self.arena.write();
        let mut generations = self.generations.write();
        let index = arena
            .iter()
            .position(|slot| slot.is_none())
            .unwrap_or_else(|| {
                arena.push(None);
                generations.push(0);
                arena.len() - 1
            });
        let id = ArId {
            index: index as u16,
            generation: generations[index],
        };

        let entry = ArEntry {
            id,
            station_name: device.station_name.clone(),
            state: ArState::Primed,
            ar_uuid: ar_uuid_for(&device.station_name, session_key),
            session_key,
            vendor_id: device.vendor_id,
            device_id: device.device_id,
            device_mac: device.mac,
            device_ip: device.ip,
            timing,
            slots,
            strategy: None,
            input: None,
            output: None,
            tx_cycle_counter: 0,
            last_rx_counter: None,
            last_counter_advance: None,
            last_input: None,
            rel_sent_at: None,
            fault_since: None,
        };
        log::info!(
            "[ArManager] {} created station={} session={} uuid={}",
            id,
            entry.station_name,
            entry.session_key,
            entry.ar_uuid
        );
        arena[index] = Some(entry);
        Ok(id)
    }

    pub fn find_by_station(&self, station_name: &str) -> Option<ArId> {
        self.arena
            .read()
            .iter()
            .flatten()
            .find(|e| e.station_name == station_name && e.state != ArState::Closed)
            .map(|e| e.id)
    }

    pub fn state_of(&self, id: ArId) -> Option<ArState> {
        let arena = self.arena.read();
        entry_ref(&arena, id).map(|e| e.state)
    }

    pub fn station_of(&self, id: ArId) -> Option<String> {
        let arena = self.arena.read();
        entry_ref(&arena, id).map(|e| e.station_name.clone())
    }

    /// Drop a CLOSED AR from the arena, bumping the slot generation so
    /// stale handles stop resolving.
    pub fn remove_closed(&self, id: ArId) -> bool {
        let mut arena = self.arena.write();
        let Some(entry) = entry_ref(&arena, id) else {
            return false;
        };
        if entry.state != ArState::Closed && entry.state != ArState::Fault {
            return false;
        }
        if let Some(input) = &entry.input {
            self.demux.write().remove(&input.frame_id);
        }
        arena[id.index as usize] = None;
        self.generations.write()[id.index as usize] = id.generation.wrapping_add(1);
        true
    }

    // ===== Connect sequence =====

    /// Drive PRIMED -> PRM_END_SENT (connect + parameterize).
    ///
    /// Blocking; runs on the coordinator thread. The device's
    /// ApplicationReady callback later completes the bring-up.
    pub fn connect(&self, id: ArId, local_mac: MacAddr, controller_name: &StationName) -> RpcResult<()> {
        // Snapshot what the RPC exchange needs, then drop the lock; the
        // connect round-trips can take seconds.
        let (params, peer, object, session_key) = {
            let mut arena = self.arena.write();
            let entry = entry_mut(&mut arena, id).ok_or_else(|| stale_handle(id))?;
            if entry.state != ArState::Primed {
                return Err(RpcError::Io(std::io::Error::other(format!(
                    "{} not in PRIMED but {}",
                    id, entry.state
                ))));
            }
            entry.state = ArState::ConnectReqSent;
            let params = ConnectParams {
                ar_uuid: entry.ar_uuid,
                session_key: entry.session_key,
                cmi_mac: local_mac,
                cmi_object: PnUuid::object_for_device(1, 0, 0),
                station_name: controller_name.clone(),
                send_clock_factor: entry.timing.send_clock_factor,
                reduction_ratio: entry.timing.reduction_ratio,
                watchdog_factor: entry.timing.watchdog_factor,
                data_hold_factor: entry.timing.data_hold_factor,
                rta_timeout_factor: entry.timing.rta_timeout_factor,
                rta_retries: entry.timing.rta_retries,
                slots: entry.slots.clone(),
            };
            let peer = SocketAddr::new(
                IpAddr::V4(Ipv4Addr::from(entry.device_ip.addr)),
                crate::config::PN_RPC_PORT,
            );
            let object = PnUuid::object_for_device(1, entry.device_id, entry.vendor_id);
            (params, peer, object, entry.session_key)
        };

        let result = self.client.connect_with_strategies(
            peer,
            object,
            PnUuid::IFACE_DEVICE,
            &params,
            &self.strategies,
        );

        let (response, strategy) = match result {
            Ok(ok) => ok,
            Err(e) => {
                self.fault(id, DiagCode::PnConnectTimeout, &format!("connect failed: {}", e));
                return Err(e);
            }
        };

        // Fold the response in.
        {
            let mut arena = self.arena.write();
            let entry = entry_mut(&mut arena, id).ok_or_else(|| stale_handle(id))?;
            entry.state = ArState::ConnectRspReceived;
            entry.strategy = Some(strategy);
            if let Some(ar) = response.ar {
                if !ar.device_mac.0.iter().all(|b| *b == 0) {
                    entry.device_mac = ar.device_mac;
                }
            }
            let input_frame_id = response
                .frame_id_for(IOCR_TYPE_INPUT)
                .ok_or(RpcError::Rejected { pnio_status: 0xDB81_0001 })?;
            let output_frame_id = response
                .frame_id_for(IOCR_TYPE_OUTPUT)
                .ok_or(RpcError::Rejected { pnio_status: 0xDB81_0002 })?;

            let mut input = Iocr::new(&entry.slots, IoDirection::Input, input_frame_id);
            input.set_all_iocs(IOXS_GOOD);
            let mut output = Iocr::new(&entry.slots, IoDirection::Output, output_frame_id);
            output.set_all_iocs(IOXS_GOOD);
            entry.input = Some(input);
            entry.output = Some(output);
            self.demux.write().insert(input_frame_id, id);

            if !response.module_diffs.is_empty() {
                self.diag.raise(
                    DiagEvent::new(
                        DiagCode::DiffWarning,
                        DiagSeverity::Warning,
                        "ArManager",
                        "connect response carried a module difference block",
                    )
                    .with("station", &entry.station_name)
                    .with("modules", response.module_diffs.len()),
                );
            }
            log::info!(
                "[ArManager] {} connected station={} frames in={:#06x} out={:#06x} ({})",
                id,
                entry.station_name,
                input_frame_id,
                output_frame_id,
                strategy
            );
        }

        // PrmEnd under the same dialect.
        let control = ControlBlock::prm_end(params.ar_uuid, session_key);
        match self
            .client
            .control(peer, object, PnUuid::IFACE_DEVICE, control, strategy)
        {
            Ok(_) => {
                let mut arena = self.arena.write();
                if let Some(entry) = entry_mut(&mut arena, id) {
                    entry.state = ArState::PrmEndSent;
                }
                Ok(())
            }
            Err(e) => {
                self.fault(id, DiagCode::PnConnectRejected, &format!("prm-end failed: {}", e));
                Err(e)
            }
        }
    }

    /// ApplicationReady callback from the RPC server.
    pub fn on_app_ready(&self, ar_uuid: PnUuid) -> bool {
        let mut arena = self.arena.write();
        let Some(entry) = arena
            .iter_mut()
            .flatten()
            .find(|e| e.ar_uuid == ar_uuid)
        else {
            log::warn!("[ArManager] application-ready for unknown ar uuid={}", ar_uuid);
            return false;
        };
        if entry.state == ArState::PrmEndSent {
            entry.state = ArState::AppReadyReceived;
            log::info!(
                "[ArManager] {} application-ready station={}",
                entry.id,
                entry.station_name
            );
            true
        } else {
            log::debug!(
                "[ArManager] {} application-ready ignored in state {}",
                entry.id,
                entry.state
            );
            false
        }
    }

    // ===== Cyclic path =====

    /// Route a received RT frame into its AR's input buffer.
    ///
    /// Refreshes the watchdog only when the cycle counter advances; a
    /// frozen counter for a whole watchdog period trips the AR like silence
    /// would.
    pub fn on_input_frame(
        &self,
        frame_id: u16,
        payload: &[u8],
        cycle_counter: u16,
        now: Instant,
    ) -> SerResult<Option<ArId>> {
        let Some(id) = self.demux.read().get(&frame_id).copied() else {
            return Ok(None);
        };
        let mut arena = self.arena.write();
        let Some(entry) = entry_mut(&mut arena, id) else {
            return Ok(None);
        };
        let Some(input) = entry.input.as_mut() else {
            return Ok(None);
        };
        input.update_from_frame(payload)?;
        entry.last_input = Some(now);

        let advanced = match entry.last_rx_counter {
            // Wrapping compare: any forward movement counts.
            Some(last) => cycle_counter != last,
            None => true,
        };
        entry.last_rx_counter = Some(cycle_counter);
        if advanced {
            entry.last_counter_advance = Some(now);
        }

        if entry.state == ArState::AppReadyReceived {
            entry.state = ArState::Run;
            entry.last_counter_advance = Some(now);
            log::info!(
                "[ArManager] {} entered RUN station={}",
                entry.id,
                entry.station_name
            );
        }
        Ok(Some(id))
    }

    /// Collect one output frame per AR in RUN; advances the tx cycle
    /// counters. Called by the cyclic sender once per tick.
    pub fn collect_tx(&self) -> Vec<OutputFrame> {
        let mut arena = self.arena.write();
        let mut frames = Vec::new();
        for entry in arena.iter_mut().flatten() {
            if entry.state != ArState::Run {
                continue;
            }
            let Some(output) = entry.output.as_ref() else {
                continue;
            };
            let counter = entry.tx_cycle_counter;
            entry.tx_cycle_counter = counter.wrapping_add(entry.timing.counter_increment());
            frames.push(OutputFrame {
                ar: entry.id,
                dst: entry.device_mac,
                frame_id: output.frame_id,
                payload: output.as_bytes().to_vec(),
                cycle_counter: counter,
            });
        }
        frames
    }

    /// Write one output slot (aligned copy into the output IOCR buffer).
    pub fn write_output(&self, id: ArId, slot: u16, subslot: u16, data: &[u8]) -> SerResult<()> {
        let mut arena = self.arena.write();
        let entry = entry_mut(&mut arena, id).ok_or_else(|| SerError::InvalidData {
            reason: format!("{} is stale", id),
        })?;
        let output = entry.output.as_mut().ok_or_else(|| SerError::InvalidData {
            reason: format!("{} has no output iocr yet", id),
        })?;
        output.write_slot(slot, subslot, data)
    }

    /// Read one input slot (data + IOPS).
    pub fn read_input(&self, id: ArId, slot: u16, subslot: u16) -> SerResult<(Vec<u8>, u8)> {
        let arena = self.arena.read();
        let entry = entry_ref(&arena, id).ok_or_else(|| SerError::InvalidData {
            reason: format!("{} is stale", id),
        })?;
        let input = entry.input.as_ref().ok_or_else(|| SerError::InvalidData {
            reason: format!("{} has no input iocr yet", id),
        })?;
        let (data, iops) = input.read_slot(slot, subslot)?;
        Ok((data.to_vec(), iops))
    }

    /// Input slots of an AR in layout order (for value publication).
    pub fn input_slots(&self, id: ArId) -> Vec<(u16, u16)> {
        let arena = self.arena.read();
        match entry_ref(&arena, id).and_then(|e| e.input.as_ref()) {
            Some(input) => input.slots().collect(),
            None => Vec::new(),
        }
    }

    // ===== Watchdog / lifecycle =====

    /// Evaluate watchdogs and release fallbacks. Called once per scheduler
    /// tick; faults fire within one tick of the deadline.
    pub fn tick(&self, now: Instant) {
        let mut expired = Vec::new();
        {
            let mut arena = self.arena.write();
            for entry in arena.iter_mut().flatten() {
                match entry.state {
                    ArState::Run => {
                        let watchdog = entry.watchdog();
                        let silent = entry
                            .last_input
                            .map(|t| now.duration_since(t) > watchdog)
                            .unwrap_or(false);
                        let frozen = entry
                            .last_counter_advance
                            .map(|t| now.duration_since(t) > watchdog)
                            .unwrap_or(false);
                        if silent || frozen {
                            entry.state = ArState::Fault;
                            entry.fault_since = Some(now);
                            expired.push((
                                entry.id,
                                entry.station_name.clone(),
                                if silent { "input silence" } else { "cycle counter frozen" },
                            ));
                        }
                    }
                    ArState::RelSent => {
                        if entry
                            .rel_sent_at
                            .map(|t| now.duration_since(t) > REL_FALLBACK)
                            .unwrap_or(false)
                        {
                            entry.state = ArState::Closed;
                            if let Some(input) = &entry.input {
                                self.demux.write().remove(&input.frame_id);
                            }
                            log::debug!("[ArManager] {} REL_SENT aged out, CLOSED", entry.id);
                        }
                    }
                    _ => {}
                }
            }
        }
        for (id, station, why) in expired {
            self.diag.raise(
                DiagEvent::new(
                    DiagCode::WatchdogExpired,
                    DiagSeverity::Error,
                    "ArManager",
                    why,
                )
                .with("ar", id)
                .with("station", station),
            );
        }
    }

    /// Release an AR (graceful when it got far enough to have a session).
    pub fn release(&self, id: ArId) {
        let (peer, object, ar_uuid, session_key, strategy) = {
            let mut arena = self.arena.write();
            let Some(entry) = entry_mut(&mut arena, id) else {
                return;
            };
            match entry.state {
                ArState::Closed => return,
                ArState::Primed | ArState::Fault | ArState::ConnectReqSent => {
                    entry.state = ArState::Closed;
                    return;
                }
                _ => {}
            }
            entry.state = ArState::RelSent;
            entry.rel_sent_at = Some(Instant::now());
            (
                SocketAddr::new(
                    IpAddr::V4(Ipv4Addr::from(entry.device_ip.addr)),
                    crate::config::PN_RPC_PORT,
                ),
                PnUuid::object_for_device(1, entry.device_id, entry.vendor_id),
                entry.ar_uuid,
                entry.session_key,
                entry.strategy.unwrap_or(self.strategies[0]),
            )
        };

        match self.client.release(
            peer,
            object,
            PnUuid::IFACE_DEVICE,
            ar_uuid,
            session_key,
            strategy,
        ) {
            Ok(()) => {
                let mut arena = self.arena.write();
                if let Some(entry) = entry_mut(&mut arena, id) {
                    if let Some(input) = &entry.input {
                        self.demux.write().remove(&input.frame_id);
                    }
                    entry.state = ArState::Closed;
                    log::info!("[ArManager] {} released station={}", id, entry.station_name);
                }
            }
            Err(e) => {
                self.diag.raise(
                    DiagEvent::new(
                        DiagCode::ReleaseTimeout,
                        DiagSeverity::Warning,
                        "ArManager",
                        format!("release did not complete: {}", e),
                    )
                    .with("ar", id),
                );
                // tick() ages REL_SENT out to CLOSED.
            }
        }
    }

    /// Operator retry: FAULT -> PRIMED with fresh buffers.
    pub fn retry(&self, id: ArId) -> bool {
        let mut arena = self.arena.write();
        let Some(entry) = entry_mut(&mut arena, id) else {
            return false;
        };
        if entry.state != ArState::Fault {
            return false;
        }
        if let Some(input) = &entry.input {
            self.demux.write().remove(&input.frame_id);
        }
        entry.state = ArState::Primed;
        entry.input = None;
        entry.output = None;
        entry.strategy = None;
        entry.tx_cycle_counter = 0;
        entry.last_rx_counter = None;
        entry.last_counter_advance = None;
        entry.last_input = None;
        entry.fault_since = None;
        log::info!("[ArManager] {} retry: FAULT -> PRIMED", id);
        true
    }

    fn fault(&self, id: ArId, code: DiagCode, message: &str) {
        let station = {
            let mut arena = self.arena.write();
            match entry_mut(&mut arena, id) {
                Some(entry) => {
                    entry.state = ArState::Fault;
                    entry.fault_since = Some(Instant::now());
                    entry.station_name.clone()
                }
                None => return,
            }
        };
        self.diag.raise(
            DiagEvent::new(code, DiagSeverity::Error, "ArManager", message)
                .with("ar", id)
                .with("station", station),
        );
    }

    /// Summaries for the registry / shared-state writer.
    pub fn snapshot(&self) -> Vec<ArSummary> {
        let now = Instant::now();
        self.arena
            .read()
            .iter()
            .flatten()
            .map(|e| ArSummary {
                id: e.id,
                station_name: e.station_name.clone(),
                state: e.state,
                device_ip: e.device_ip,
                last_input_age: e.last_input.map(|t| now.duration_since(t)),
                fault_since: e.fault_since,
            })
            .collect()
    }
}

fn entry_ref<'a>(arena: &'a [Option<ArEntry>], id: ArId) -> Option<&'a ArEntry> {
    arena
        .get(id.index as usize)?
        .as_ref()
        .filter(|e| e.id.generation == id.generation)
}

fn entry_mut<'a>(arena: &'a mut [Option<ArEntry>], id: ArId) -> Option<&'a mut ArEntry> {
    arena
        .get_mut(id.index as usize)?
        .as_mut()
        .filter(|e| e.id.generation == id.generation)
}

fn stale_handle(id: ArId) -> RpcError {
    RpcError::Io(std::io::Error::other(format!("{} is stale", id)))
}

/// Deterministic AR UUID from station name and session key.
fn ar_uuid_for(station_name: &str, session_key: u16) -> PnUuid {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in station_name.bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    let mut uuid = [0u8; 16];
    uuid[0..8].copy_from_slice(&hash.to_be_bytes());
    uuid[8..10].copy_from_slice(&session_key.to_be_bytes());
    uuid[10..14].copy_from_slice(&std::process::id().to_be_bytes());
    uuid[14] = 0x4A;
    uuid[15] = 0x52;
    PnUuid(uuid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::udp::PairEndpoint;

    fn device_info(name: &str) -> DeviceInfo {
        DeviceInfo {
            station_name: name.to_string(),
            vendor_id: 0x0272,
            device_id: 0x0C05,
            mac: MacAddr([0x00, 0x0A, 0xCD, 0x01, 0x02, 0x03]),
            ip: IpParams::new([192, 168, 1, 50], [255, 255, 255, 0], [192, 168, 1, 1]),
            last_seen: Instant::now(),
        }
    }

    fn slots() -> Vec<ExpectedSlot> {
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
                slot: 3,
                subslot: 1,
                module_ident: 0x31,
                submodule_ident: 0x02,
                direction: IoDirection::Output,
                data_length: 4,
            },
        ]
    }

    fn manager() -> ArManager {
        let (ctrl, _dev) = PairEndpoint::pair();
        ArManager::new(
            Arc::new(RpcClient::new(Arc::new(ctrl))),
            Arc::new(DiagHub::new()),
        )
    }

    #[test]
    fn test_create_ar_starts_primed() {
        let manager = manager();
        let id = manager
            .create_ar(&device_info("intake-rtu-01"), slots(), CycleTiming::default())
            .expect("create ar");
        assert_eq!(manager.state_of(id), Some(ArState::Primed));
    }

    #[test]
    fn test_one_ar_per_station_name() {
        let manager = manager();
        let first = manager
            .create_ar(&device_info("intake-rtu-01"), slots(), CycleTiming::default())
            .expect("create first");
        let second = manager
            .create_ar(&device_info("intake-rtu-01"), slots(), CycleTiming::default())
            .expect("create second");
        assert_ne!(first, second);
        // The first handle is gone; only the second resolves.
        assert_eq!(manager.state_of(first), None);
        assert_eq!(manager.state_of(second), Some(ArState::Primed));
        assert_eq!(manager.find_by_station("intake-rtu-01"), Some(second));
    }

    #[test]
    fn test_invalid_timing_rejected() {
        let manager = manager();
        let timing = CycleTiming {
            reduction_ratio: 3,
            ..CycleTiming::default()
        };
        assert!(manager
            .create_ar(&device_info("intake-rtu-01"), slots(), timing)
            .is_err());
    }

    #[test]
    fn test_stale_handle_does_not_resolve_after_remove() {
        let manager = manager();
        let id = manager
            .create_ar(&device_info("intake-rtu-01"), slots(), CycleTiming::default())
            .expect("create ar");
        manager.release(id); // PRIMED -> CLOSED directly
        assert_eq!(manager.state_of(id), Some(ArState::Closed));
        assert!(manager.remove_closed(id));
        assert_eq!(manager.state_of(id), None);

        // A new AR may land in the same arena slot with a bumped generation.
        let next = manager
            .create_ar(&device_info("intake-rtu-01"), slots(), CycleTiming::default())
            .expect("create next");
        assert_eq!(next.index, id.index);
        assert_ne!(next.generation, id.generation);
        assert_eq!(manager.state_of(id), None);
    }

    #[test]
    fn test_retry_requires_fault() {
        let manager = manager();
        let id = manager
            .create_ar(&device_info("intake-rtu-01"), slots(), CycleTiming::default())
            .expect("create ar");
        assert!(!manager.retry(id));
    }

    #[test]
    fn test_ar_uuid_differs_per_session() {
        let a = ar_uuid_for("intake-rtu-01", 1);
        let b = ar_uuid_for("intake-rtu-01", 2);
        let c = ar_uuid_for("intake-rtu-02", 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
