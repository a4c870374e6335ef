// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime supervisor: composes every subsystem from one
//! [`ControllerConfig`] and owns the thread set.
//!
//! No globals -- the process builds one [`Controller`]; tests build several
//! with loopback links and heap segments. Threads and their drain order on
//! shutdown (10 s budget, then sockets are force-closed by drop):
//!
//! ```text
//! coordinator -> control -> worker (alarm/historian/commands)
//!             -> rpc server -> cyclic sender/receiver -> AR release
//! ```

use crate::alarm::AlarmManager;
use crate::ar::{ArManager, ArState};
use crate::config::{ControllerConfig, SHUTDOWN_BUDGET};
use crate::control::{ControlEngine, InterlockSet, LoopBinding, PidLoop, PidMode, Sequencer};
use crate::core::types::{Quality, Sample, StationName};
use crate::diag::{DiagCode, DiagEvent, DiagHub, DiagSeverity};
use crate::discovery::{DcpWorker, DeviceCache};
use crate::engine::{CyclicEngine, InputEvent};
use crate::error::{Error, Result};
use crate::historian::Historian;
use crate::registry::{
    AuthorityTable, AuthorityVerdict, Coordinator, CoordinatorEvent, RtuRecord, RtuRegistry,
};
use crate::rpc::{RpcClient, RpcServer, ServerEvent};
use crate::shm::{
    AlarmExport, CommandConsumer, CommandKind, CommandStatus, RtuExport, Segment, ShmWriter,
};
use crate::telemetry::CycleStats;
use crate::transport::udp::Endpoint;
use crate::transport::Link;
use crossbeam_channel::{bounded, Receiver};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Shared mutable state of the supervisory layer.
struct Supervisory {
    control: Mutex<ControlEngine>,
    alarms: Mutex<AlarmManager>,
    historian: Mutex<Historian>,
    /// Latest decoded sensor values by tag ("station:slot").
    values: RwLock<HashMap<String, f64>>,
    /// Latest commanded actuator values by tag.
    actuators: RwLock<HashMap<String, f64>>,
    /// Station name -> shared-state row (stable for the process lifetime).
    rows: Mutex<HashMap<String, usize>>,
}

impl Supervisory {
    fn row_of(&self, station: &str) -> usize {
        let mut rows = self.rows.lock();
        let next = rows.len();
        *rows.entry(station.to_string()).or_insert(next)
    }
}

/// The composed controller.
pub struct Controller {
    config: ControllerConfig,
    diag: Arc<DiagHub>,
    stats: Arc<CycleStats>,
    link: Arc<dyn Link>,
    cache: Arc<DeviceCache>,
    dcp: Arc<DcpWorker>,
    client: Arc<RpcClient>,
    manager: Arc<ArManager>,
    registry: Arc<RtuRegistry>,
    authority: Arc<AuthorityTable>,
    supervisory: Arc<Supervisory>,
    stop: Arc<AtomicBool>,
    threads: Vec<(String, JoinHandle<()>)>,
}

impl Controller {
    /// Compose and start with injected transport and shared memory
    /// (deterministic embedding; tests and simulators use this).
    ///
    /// The client endpoint carries controller-initiated RPC; the server
    /// endpoint (port 34964 in production) receives device-originated
    /// requests. Separate sockets keep the two from consuming each other's
    /// datagrams.
    pub fn start(
        config: ControllerConfig,
        link: Arc<dyn Link>,
        client_endpoint: Arc<dyn Endpoint>,
        server_endpoint: Arc<dyn Endpoint>,
        segment: Arc<dyn Segment>,
        store: Option<Box<dyn crate::historian::ChunkStore>>,
    ) -> Result<Controller> {
        // The name goes out in every connect request; reject bad ones here
        // rather than at the first connect.
        StationName::parse(&config.controller_name).map_err(Error::Config)?;
        config.timing.validate().map_err(Error::Config)?;

        let diag = Arc::new(DiagHub::new());
        let stats = Arc::new(CycleStats::new());
        let stop = Arc::new(AtomicBool::new(false));

        // Discovery.
        let cache = Arc::new(DeviceCache::new(
            Duration::from_secs(config.device_ttl_secs),
            Arc::clone(&diag),
        ));
        let (dcp_tx, dcp_rx) = bounded(256);
        let dcp = Arc::new(DcpWorker::new(
            Arc::clone(&link),
            Arc::clone(&cache),
            dcp_rx,
        ));

        // RPC.
        let client = Arc::new(RpcClient::new(client_endpoint));
        let (server_tx, server_rx) = bounded(64);
        let server = RpcServer::new(server_endpoint, server_tx, Arc::clone(&stop));

        // Session + registry.
        let manager = Arc::new(ArManager::new(Arc::clone(&client), Arc::clone(&diag)));
        let registry = Arc::new(RtuRegistry::new());
        for rtu in &config.rtus {
            let mut record = RtuRecord::new(rtu.station_name.clone(), rtu.role);
            record.partner = rtu.partner.clone();
            registry.add(record);
        }
        let authority = Arc::new(AuthorityTable::new(Duration::from_millis(
            config.coordinator.stale_command_window_ms,
        )));

        // Supervisory layer.
        let mut control = ControlEngine::new(InterlockSet::new(config.interlocks.clone()));
        for entry in &config.pid_loops {
            control.add_loop(
                entry.name.clone(),
                PidLoop::new(entry.pid.clone()),
                LoopBinding {
                    pv_tag: entry.pv_tag.clone(),
                    out_tag: entry.out_tag.clone(),
                },
            );
        }
        for entry in &config.sequences {
            control.add_sequencer(Sequencer::new(
                entry.name.clone(),
                entry.steps.clone(),
                entry.cyclic,
            ));
        }
        control.set_cascades(config.cascades.clone());

        let alarms = AlarmManager::new(
            config.alarm_rules.clone(),
            config.alarms.clone(),
            Arc::clone(&diag),
        );
        let mut historian = Historian::new(
            store,
            config.historian.ring_capacity,
            config.historian.compress_chunks,
            Arc::clone(&diag),
        );
        for tag in &config.historian_tags {
            historian.add_tag(tag.clone());
        }

        let supervisory = Arc::new(Supervisory {
            control: Mutex::new(control),
            alarms: Mutex::new(alarms),
            historian: Mutex::new(historian),
            values: RwLock::new(HashMap::new()),
            actuators: RwLock::new(HashMap::new()),
            rows: Mutex::new(HashMap::new()),
        });

        // IPC.
        let writer = ShmWriter::create(Arc::clone(&segment))?;
        let consumer = CommandConsumer::new(Arc::clone(&segment))?;

        // Coordinator.
        let (coord_tx, coord_rx) = bounded(64);
        let coordinator = Coordinator::new(
            Arc::clone(&registry),
            Arc::clone(&manager),
            Arc::clone(&authority),
            Arc::clone(&diag),
            config.coordinator.clone(),
            coord_tx,
        )
        .with_cascades(config.cascades.clone());

        // Cyclic engine.
        let engine = Arc::new(CyclicEngine::new(
            Arc::clone(&link),
            Arc::clone(&manager),
            Arc::clone(&stats),
            Arc::clone(&diag),
            config.timing.cycle_period(),
            Arc::clone(&stop),
        ));
        let (input_tx, input_rx) = bounded(4_096);

        let mut controller = Controller {
            config,
            diag,
            stats,
            link,
            cache,
            dcp,
            client,
            manager,
            registry,
            authority,
            supervisory,
            stop: Arc::clone(&stop),
            threads: Vec::new(),
        };

        controller.spawn_threads(
            engine,
            server,
            coordinator,
            coord_rx,
            server_rx,
            input_tx,
            input_rx,
            dcp_tx,
            writer,
            consumer,
        );
        log::info!(
            "[Controller] started name={} interface={}",
            controller.config.controller_name,
            controller.config.interface
        );
        Ok(controller)
    }

    /// Open the real interface, UDP endpoint and shm segment, then start.
    ///
    /// A missing raw-socket capability is fatal for the PROFINET subsystem:
    /// the error is returned (and `CAPABILITY_MISSING` raised), never
    /// masked by a pretend-healthy controller.
    #[cfg(target_os = "linux")]
    pub fn start_on_system(config: ControllerConfig) -> Result<Controller> {
        let diag = DiagHub::new();
        let link = match crate::transport::raw::RawLink::open(
            &config.interface,
            config.socket_priority,
        ) {
            Ok(link) => Arc::new(link) as Arc<dyn Link>,
            Err(e) => {
                diag.raise(
                    DiagEvent::new(
                        DiagCode::CapabilityMissing,
                        DiagSeverity::Fatal,
                        "Controller",
                        e.to_string(),
                    )
                    .with("interface", &config.interface),
                );
                return Err(Error::Link(e));
            }
        };
        let client_endpoint = Arc::new(
            crate::transport::udp::UdpEndpoint::bind_ephemeral().map_err(crate::rpc::RpcError::Io)?,
        );
        let server_endpoint =
            Arc::new(crate::transport::udp::UdpEndpoint::bind().map_err(crate::rpc::RpcError::Io)?);
        let segment: Arc<dyn Segment> = Arc::new(crate::shm::ShmSegment::create(
            &config.shm_name,
            crate::shm::layout::SEGMENT_LEN,
        )?);
        let store: Option<Box<dyn crate::historian::ChunkStore>> = match &config.historian.db_path {
            #[cfg(feature = "sqlite")]
            Some(path) => Some(Box::new(crate::historian::SqliteStore::open(
                path,
                config.historian.compress_chunks,
            )?)),
            _ => None,
        };
        Self::start(config, link, client_endpoint, server_endpoint, segment, store)
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_threads(
        &mut self,
        engine: Arc<CyclicEngine>,
        server: RpcServer,
        coordinator: Coordinator,
        coord_rx: Receiver<CoordinatorEvent>,
        server_rx: Receiver<ServerEvent>,
        input_tx: crossbeam_channel::Sender<InputEvent>,
        input_rx: Receiver<InputEvent>,
        dcp_tx: crossbeam_channel::Sender<crate::transport::EthFrame>,
        writer: ShmWriter,
        consumer: CommandConsumer,
    ) {
        // Cyclic pair (realtime-high inside the engine).
        self.threads.push((
            "cyclic-tx".into(),
            engine.spawn_sender(),
        ));
        self.threads.push((
            "cyclic-rx".into(),
            engine.spawn_receiver(input_tx, dcp_tx),
        ));

        // RPC server.
        self.threads.push((
            "rpc-server".into(),
            std::thread::Builder::new()
                .name("hpnc-rpc-server".into())
                .spawn(move || server.run())
                .expect("thread spawn cannot fail with a valid name"),
        ));

        // Coordinator.
        let stop = Arc::clone(&self.stop);
        self.threads.push((
            "coordinator".into(),
            std::thread::Builder::new()
                .name("hpnc-coordinator".into())
                .spawn(move || coordinator.run(&stop))
                .expect("thread spawn cannot fail with a valid name"),
        ));

        // Control scan (realtime-med).
        let supervisory = Arc::clone(&self.supervisory);
        let manager = Arc::clone(&self.manager);
        let registry = Arc::clone(&self.registry);
        let stop = Arc::clone(&self.stop);
        let scan_period = Duration::from_millis(self.config.control.scan_period_ms);
        self.threads.push((
            "control".into(),
            std::thread::Builder::new()
                .name("hpnc-control".into())
                .spawn(move || {
                    crate::engine::set_realtime_priority(crate::engine::RtPriority::Medium);
                    control_loop(&supervisory, &manager, &registry, &coord_rx, scan_period, &stop);
                })
                .expect("thread spawn cannot fail with a valid name"),
        ));

        // Worker: samples, alarms, historian, commands, shm publication.
        let supervisory = Arc::clone(&self.supervisory);
        let manager = Arc::clone(&self.manager);
        let registry = Arc::clone(&self.registry);
        let authority = Arc::clone(&self.authority);
        let cache = Arc::clone(&self.cache);
        let dcp = Arc::clone(&self.dcp);
        let diag = Arc::clone(&self.diag);
        let stop = Arc::clone(&self.stop);
        let link = Arc::clone(&self.link);
        let config = self.config.clone();
        self.threads.push((
            "worker".into(),
            std::thread::Builder::new()
                .name("hpnc-worker".into())
                .spawn(move || {
                    worker_loop(WorkerCtx {
                        supervisory,
                        manager,
                        registry,
                        authority,
                        cache,
                        dcp,
                        diag,
                        link,
                        config,
                        input_rx,
                        server_rx,
                        writer,
                        consumer,
                        stop,
                    })
                })
                .expect("thread spawn cannot fail with a valid name"),
        ));
    }

    /// Direct access for embedders and tests.
    pub fn diag(&self) -> &Arc<DiagHub> {
        &self.diag
    }

    pub fn stats(&self) -> &Arc<CycleStats> {
        &self.stats
    }

    pub fn device_cache(&self) -> &Arc<DeviceCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<RtuRegistry> {
        &self.registry
    }

    pub fn ar_manager(&self) -> &Arc<ArManager> {
        &self.manager
    }

    pub fn authority(&self) -> &Arc<AuthorityTable> {
        &self.authority
    }

    pub fn rpc_client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    /// Stop every thread in drain order, releasing live ARs on the way.
    pub fn shutdown(mut self) {
        log::info!("[Controller] shutdown requested");
        let deadline = Instant::now() + SHUTDOWN_BUDGET;
        self.stop.store(true, Ordering::Release);

        // Release ARs in RUN before the sockets go away (3 s cap each,
        // bounded by the overall budget).
        for summary in self.manager.snapshot() {
            if summary.state == ArState::Run && Instant::now() < deadline {
                self.manager.release(summary.id);
            }
        }

        // Deterministic drain order.
        for name in [
            "coordinator",
            "control",
            "worker",
            "rpc-server",
            "cyclic-tx",
            "cyclic-rx",
        ] {
            if let Some(pos) = self.threads.iter().position(|(n, _)| n == name) {
                let (_, handle) = self.threads.remove(pos);
                while !handle.is_finished() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(10));
                }
                if handle.is_finished() {
                    let _ = handle.join();
                } else {
                    log::warn!("[Controller] {} did not drain inside the budget", name);
                }
            }
        }
        log::info!("[Controller] shutdown complete");
    }
}

// ===== Control thread =====

fn control_loop(
    supervisory: &Supervisory,
    manager: &ArManager,
    registry: &RtuRegistry,
    coord_rx: &Receiver<CoordinatorEvent>,
    scan_period: Duration,
    stop: &AtomicBool,
) {
    log::info!("[Control] scan started period={:?}", scan_period);
    while !stop.load(Ordering::Acquire) {
        let started = Instant::now();

        // Failover handoff: reissue held set-points to the promoted RTU.
        while let Ok(event) = coord_rx.try_recv() {
            if let CoordinatorEvent::Promoted {
                failed, promoted, ..
            } = event
            {
                reissue_outputs(supervisory, manager, &failed, &promoted);
            }
        }

        let values = supervisory.values.read().clone();
        let result = supervisory.control.lock().scan(&values, started);
        for write in &result.writes {
            apply_actuator(supervisory, manager, &write.target, write.value);
            mirror_to_hot_standby(supervisory, manager, registry, &write.target, write.value);
        }

        let elapsed = started.elapsed();
        if elapsed < scan_period {
            std::thread::sleep(scan_period - elapsed);
        }
    }
    log::info!("[Control] scan stopped");
}

/// Hot-standby pairs get every output in parallel; the coordinator decides
/// whose feedback is trusted by keeping the primary role on it.
fn mirror_to_hot_standby(
    supervisory: &Supervisory,
    manager: &ArManager,
    registry: &RtuRegistry,
    target: &str,
    value: f64,
) {
    let Some((station, slot)) = split_tag(target) else {
        return;
    };
    let Some(partner) = registry.get(station).and_then(|r| r.partner) else {
        return;
    };
    let partner_is_standby = registry
        .get(&partner)
        .map(|r| r.role == crate::registry::RtuRole::HotStandby)
        .unwrap_or(false);
    if partner_is_standby {
        apply_actuator(supervisory, manager, &format!("{}:{}", partner, slot), value);
    }
}

/// Write one actuator tag through to its AR output buffer.
fn apply_actuator(supervisory: &Supervisory, manager: &ArManager, target: &str, value: f64) {
    supervisory
        .actuators
        .write()
        .insert(target.to_string(), value);
    let Some((station, slot)) = split_tag(target) else {
        return;
    };
    let Some(ar) = manager.find_by_station(station) else {
        return;
    };
    let mut data = [0u8; 4];
    encode_slot_value(value, &mut data);
    if let Err(e) = manager.write_output(ar, slot, 1, &data) {
        log::debug!("[Control] output write failed target={}: {}", target, e);
    }
}

/// On promotion, copy every actuator value addressed to the failed station
/// onto the promoted one (same slot layout on the redundant pair).
fn reissue_outputs(
    supervisory: &Supervisory,
    manager: &ArManager,
    failed: &str,
    promoted: &str,
) {
    let actuators = supervisory.actuators.read().clone();
    let mut reissued = 0;
    for (tag, value) in actuators {
        let Some((station, slot)) = split_tag(&tag) else {
            continue;
        };
        if station != failed {
            continue;
        }
        let new_tag = format!("{}:{}", promoted, slot);
        apply_actuator(supervisory, manager, &new_tag, value);
        reissued += 1;
    }
    log::info!(
        "[Control] reissued {} set-points {} -> {}",
        reissued,
        failed,
        promoted
    );
}

// ===== Worker thread =====

struct WorkerCtx {
    supervisory: Arc<Supervisory>,
    manager: Arc<ArManager>,
    registry: Arc<RtuRegistry>,
    authority: Arc<AuthorityTable>,
    cache: Arc<DeviceCache>,
    dcp: Arc<DcpWorker>,
    diag: Arc<DiagHub>,
    link: Arc<dyn Link>,
    config: ControllerConfig,
    input_rx: Receiver<InputEvent>,
    server_rx: Receiver<ServerEvent>,
    writer: ShmWriter,
    consumer: CommandConsumer,
    stop: Arc<AtomicBool>,
}

fn worker_loop(mut ctx: WorkerCtx) {
    log::info!("[Worker] started");
    let publish_period = Duration::from_millis(100);
    let flush_period = Duration::from_millis(ctx.config.historian.flush_interval_ms);
    let mut last_publish = Instant::now();
    let mut last_flush = Instant::now();

    while !ctx.stop.load(Ordering::Acquire) {
        // Device-originated RPC events.
        while let Ok(event) = ctx.server_rx.try_recv() {
            ctx.manager.on_app_ready(event.block.ar_uuid);
        }

        // Fresh cyclic input (bounded wait doubles as the loop's tick).
        match ctx.input_rx.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => {
                publish_inputs(&mut ctx, event);
                // Drain whatever else queued behind it.
                while let Ok(event) = ctx.input_rx.try_recv() {
                    publish_inputs(&mut ctx, event);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }

        // Operator/API commands.
        while let Some(command) = ctx.consumer.pop() {
            dispatch_command(&mut ctx, command);
        }

        if last_publish.elapsed() >= publish_period {
            last_publish = Instant::now();
            publish_shared_state(&mut ctx);
        }
        if last_flush.elapsed() >= flush_period {
            last_flush = Instant::now();
            let mut historian = ctx.supervisory.historian.lock();
            historian.flush();
            historian.evict_expired(now_ns());
        }
    }

    // Final flush on the way out.
    ctx.supervisory.historian.lock().flush();
    log::info!("[Worker] stopped");
}

/// Decode one AR's fresh input slots into samples, alarms and history.
fn publish_inputs(ctx: &mut WorkerCtx, event: InputEvent) {
    let Some(station) = ctx.manager.station_of(event.ar) else {
        return;
    };
    let timestamp_ns = now_ns();
    let row = ctx.supervisory.row_of(&station);

    for (slot, subslot) in ctx.manager.input_slots(event.ar) {
        let Ok((data, iops)) = ctx.manager.read_input(event.ar, slot, subslot) else {
            continue;
        };
        let value = decode_slot_value(&data);
        let quality = if iops == crate::protocol::constants::IOXS_GOOD {
            Quality::Good
        } else {
            Quality::Bad
        };
        let tag = format!("{}:{}", station, slot);
        ctx.supervisory.values.write().insert(tag.clone(), value);

        let mut alarms = ctx.supervisory.alarms.lock();
        alarms.process_sample(&tag, value, timestamp_ns);
        drop(alarms);

        let tag_id = (row * crate::config::MAX_SLOTS + slot as usize) as u32;
        let mut historian = ctx.supervisory.historian.lock();
        if historian.has_tag(tag_id) {
            historian.record(Sample {
                tag: tag_id,
                timestamp_ns,
                value,
                quality,
            });
        }
    }
}

/// One publication of RTUs, sensor matrix and alarms into the segment.
fn publish_shared_state(ctx: &mut WorkerCtx) {
    let summaries = ctx.manager.snapshot();
    let rtu_records = ctx.registry.snapshot();
    let values = ctx.supervisory.values.read().clone();
    let actuators = ctx.supervisory.actuators.read().clone();
    let alarms = ctx.supervisory.alarms.lock();
    let alarm_exports: Vec<AlarmExport> = alarms
        .active_alarms()
        .iter()
        .map(|a| AlarmExport {
            id: a.id,
            rule_id: a.rule_id,
            rtu: a.rtu.clone(),
            slot: a.slot,
            severity: a.severity as u8,
            state: a.state as u8,
            condition: a.condition as u8,
            trip_ts_ns: a.trip_ts_ns,
            clear_ts_ns: a.clear_ts_ns,
            ack_ts_ns: a.ack_ts_ns,
            trip_value: a.trip_value,
            operator: a.operator.clone(),
            shelved_until_ns: a.shelved_until_ns,
        })
        .collect();
    drop(alarms);

    let now = now_ns() as u64;
    let mut rtu_exports = Vec::with_capacity(rtu_records.len());
    for record in &rtu_records {
        let state = record
            .ar
            .and_then(|ar| summaries.iter().find(|s| s.id == ar))
            .map(|s| s.state.as_u8())
            .unwrap_or(ArState::Closed.as_u8());
        let ip = record
            .ar
            .and_then(|ar| summaries.iter().find(|s| s.id == ar))
            .map(|s| s.device_ip.addr)
            .unwrap_or([0; 4]);
        rtu_exports.push(RtuExport {
            station_name: record.station_name.clone(),
            state,
            health: record.health.as_u8(),
            ip,
            last_update_ns: now,
        });
        // Rows follow registry membership.
        ctx.supervisory.row_of(&record.station_name);
    }

    let rows = ctx.supervisory.rows.lock().clone();
    let now_ms = (now / 1_000_000) as u32;
    ctx.writer.publish(|p| {
        p.set_rtus(&rtu_exports);
        for (tag, value) in &values {
            if let Some((station, slot)) = split_tag(tag) {
                if let Some(row) = rows.get(station) {
                    p.set_sensor(*row, slot as usize, *value, Quality::Good, now_ms);
                }
            }
        }
        for (tag, value) in &actuators {
            if let Some((station, slot)) = split_tag(tag) {
                if let Some(row) = rows.get(station) {
                    p.set_actuator(*row, slot as usize, *value, Quality::Good, now_ms);
                }
            }
        }
        p.set_alarms(&alarm_exports);
    });
}

/// Validate authority and dispatch one command.
fn dispatch_command(ctx: &mut WorkerCtx, command: crate::shm::Command) {
    let verdict = ctx
        .authority
        .validate(&command.target, command.authority_generation);
    if verdict == AuthorityVerdict::Stale {
        ctx.diag.raise(
            DiagEvent::new(
                DiagCode::StaleCommandRejected,
                DiagSeverity::Warning,
                "Worker",
                "command carried an outdated authority generation",
            )
            .with("target", &command.target)
            .with("generation", command.authority_generation)
            .with("current", ctx.authority.current(&command.target)),
        );
        ctx.consumer
            .respond(command.seq, CommandStatus::StaleRejected, &command.target);
        return;
    }

    let status = match command.kind {
        CommandKind::ActuatorSet => {
            let value = f64::from_le_bytes(
                command.payload[0..8].try_into().expect("payload is 64 bytes"),
            );
            apply_actuator(&ctx.supervisory, &ctx.manager, &command.target, value);
            mirror_to_hot_standby(
                &ctx.supervisory,
                &ctx.manager,
                &ctx.registry,
                &command.target,
                value,
            );
            CommandStatus::Accepted
        }
        CommandKind::SetPointSet => {
            let value = f64::from_le_bytes(
                command.payload[0..8].try_into().expect("payload is 64 bytes"),
            );
            if ctx.supervisory.control.lock().set_setpoint(&command.target, value) {
                CommandStatus::Accepted
            } else {
                CommandStatus::BadTarget
            }
        }
        CommandKind::PidMode => {
            let manual = command.payload[0] != 0;
            let output = f64::from_le_bytes(
                command.payload[8..16].try_into().expect("payload is 64 bytes"),
            );
            let pv = ctx
                .supervisory
                .control
                .lock()
                .last_output_of(&command.target)
                .unwrap_or(0.0);
            let mode = if manual { PidMode::Manual } else { PidMode::Auto };
            if ctx
                .supervisory
                .control
                .lock()
                .set_mode(&command.target, mode, output, pv)
            {
                CommandStatus::Accepted
            } else {
                CommandStatus::BadTarget
            }
        }
        CommandKind::AlarmAck => {
            let operator = String::from_utf8_lossy(&command.payload)
                .trim_end_matches('\0')
                .to_string();
            let rule_id: u32 = command.target.parse().unwrap_or(0);
            if ctx
                .supervisory
                .alarms
                .lock()
                .acknowledge(rule_id, &operator, now_ns())
            {
                CommandStatus::Accepted
            } else {
                CommandStatus::BadTarget
            }
        }
        CommandKind::AddRtu => {
            let role = match command.payload[0] {
                1 => crate::registry::RtuRole::Secondary,
                2 => crate::registry::RtuRole::HotStandby,
                3 => crate::registry::RtuRole::LoadBalancedPeer,
                _ => crate::registry::RtuRole::Primary,
            };
            ctx.registry
                .add(RtuRecord::new(command.target.clone(), role));
            CommandStatus::Accepted
        }
        CommandKind::ConnectRtu => match connect_rtu(ctx, &command.target) {
            Ok(()) => CommandStatus::Accepted,
            Err(status) => status,
        },
        CommandKind::DcpDiscover => {
            // Identify blocks for the window; run it off-thread.
            let dcp = Arc::clone(&ctx.dcp);
            std::thread::Builder::new()
                .name("hpnc-dcp-identify".into())
                .spawn(move || {
                    if let Err(e) = dcp.identify_all(Duration::from_secs(1)) {
                        log::warn!("[Worker] dcp discover failed: {}", e);
                    }
                })
                .map(|_| CommandStatus::Accepted)
                .unwrap_or(CommandStatus::ResourceExhausted)
        }
    };
    ctx.consumer.respond(command.seq, status, &command.target);
}

/// Create + connect an AR for a cached device (blocking RPC sequence,
/// handed to its own thread).
fn connect_rtu(ctx: &WorkerCtx, station: &str) -> std::result::Result<(), CommandStatus> {
    let Some(device) = ctx.cache.get(station) else {
        return Err(CommandStatus::BadTarget);
    };
    let Some(roster) = ctx
        .config
        .rtus
        .iter()
        .find(|r| r.station_name == station)
    else {
        return Err(CommandStatus::BadTarget);
    };
    let timing = roster.timing.unwrap_or(ctx.config.timing);
    let slots = roster.slots.clone();
    let Ok(controller_name) = StationName::parse(&ctx.config.controller_name) else {
        return Err(CommandStatus::BadPayload);
    };

    let manager = Arc::clone(&ctx.manager);
    let registry = Arc::clone(&ctx.registry);
    let local_mac = ctx.link.local_mac();
    let station = station.to_string();
    std::thread::Builder::new()
        .name("hpnc-connect".into())
        .spawn(move || {
            let id = match manager.create_ar(&device, slots, timing) {
                Ok(id) => id,
                Err(e) => {
                    log::warn!("[Worker] create-ar failed station={}: {}", station, e);
                    return;
                }
            };
            registry.set_ar(&station, Some(id));
            if let Err(e) = manager.connect(id, local_mac, &controller_name) {
                log::warn!("[Worker] connect failed station={}: {}", station, e);
            }
        })
        .map(|_| ())
        .map_err(|_| CommandStatus::ResourceExhausted)
}

// ===== Value codecs =====

/// Decode slot bytes to an engineering value. Slot widths carry: 8 = f64,
/// 4 = f32, 2 = u16 counts, 1 = discrete.
pub(crate) fn decode_slot_value(data: &[u8]) -> f64 {
    match data.len() {
        8 => f64::from_be_bytes(data.try_into().expect("len checked")),
        4 => f64::from(f32::from_be_bytes(data.try_into().expect("len checked"))),
        2 => f64::from(u16::from_be_bytes(data.try_into().expect("len checked"))),
        1 => f64::from(data[0]),
        _ => 0.0,
    }
}

/// Encode an engineering value into slot bytes (mirror of decode).
pub(crate) fn encode_slot_value(value: f64, out: &mut [u8]) {
    match out.len() {
        8 => out.copy_from_slice(&value.to_be_bytes()),
        4 => out.copy_from_slice(&(value as f32).to_be_bytes()),
        2 => out.copy_from_slice(&(value.clamp(0.0, f64::from(u16::MAX)) as u16).to_be_bytes()),
        1 => out[0] = value.clamp(0.0, 255.0) as u8,
        _ => {}
    }
}

fn split_tag(tag: &str) -> Option<(&str, u16)> {
    let (station, slot) = tag.rsplit_once(':')?;
    slot.parse().ok().map(|slot| (station, slot))
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
