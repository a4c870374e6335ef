// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cyclic sender and receiver loops.
//!
//! The sender wakes on an absolute tick grid (send-clock x reduction
//! ratio), transmits every RUN AR's output frame, and runs the watchdog
//! evaluation. Overruns never drop frames; they increment the counter, and
//! a sustained overrun ratio raises `SCHEDULER_OVERLOADED`.
//!
//! The receiver polls the link with a short timeout and demultiplexes by
//! frame-id window: DCP to the discovery worker, RT Class 1 into the AR
//! input buffers (publication happens downstream at normal priority).

use super::demux::{classify_frame_id, FrameClass};
use super::rt::{set_realtime_priority, RtPriority};
use crate::ar::{ArId, ArManager};
use crate::config::OVERRUN_ALERT_RATIO;
use crate::diag::{DiagCode, DiagEvent, DiagHub, DiagSeverity};
use crate::protocol::constants::DATA_STATUS_DEFAULT;
use crate::protocol::frame::{build_rt_frame, parse_rt_frame, ApduStatus};
use crate::telemetry::CycleStats;
use crate::transport::{EthFrame, Link};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Receiver poll timeout; also the stop-flag latency bound.
const RECV_POLL: Duration = Duration::from_millis(100);

/// Overrun ratio is evaluated over windows of this many loops.
const OVERRUN_WINDOW: u64 = 1_000;

/// Notification that an AR's input buffer has fresh data.
#[derive(Debug, Clone, Copy)]
pub struct InputEvent {
    pub ar: ArId,
    pub at: Instant,
}

pub struct CyclicEngine {
    link: Arc<dyn Link>,
    manager: Arc<ArManager>,
    stats: Arc<CycleStats>,
    diag: Arc<DiagHub>,
    period: Duration,
    stop: Arc<AtomicBool>,
}

impl CyclicEngine {
    pub fn new(
        link: Arc<dyn Link>,
        manager: Arc<ArManager>,
        stats: Arc<CycleStats>,
        diag: Arc<DiagHub>,
        period: Duration,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            link,
            manager,
            stats,
            diag,
            period,
            stop,
        }
    }

    /// Spawn the sender thread.
    pub fn spawn_sender(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        std::thread::Builder::new()
            .name("hpnc-cyclic-tx".into())
            .spawn(move || {
                set_realtime_priority(RtPriority::High);
                engine.run_sender();
            })
            .expect("thread spawn cannot fail with a valid name")
    }

    /// Spawn the receiver thread.
    pub fn spawn_receiver(self: &Arc<Self>, input_tx: Sender<InputEvent>, dcp_tx: Sender<EthFrame>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        std::thread::Builder::new()
            .name("hpnc-cyclic-rx".into())
            .spawn(move || {
                set_realtime_priority(RtPriority::High);
                engine.run_receiver(input_tx, dcp_tx);
            })
            .expect("thread spawn cannot fail with a valid name")
    }

    fn run_sender(&self) {
        log::info!("[Cyclic] sender started period={:?}", self.period);
        let mut next_tick = Instant::now() + self.period;
        let mut overload_reported = false;
        let mut window_loops: u64 = 0;

        while !self.stop.load(Ordering::Acquire) {
            let now = Instant::now();
            if now < next_tick {
                std::thread::sleep(next_tick - now);
            } else if now.duration_since(next_tick) > self.period {
                // Woke more than a full period late: resync the grid so we
                // do not burst-transmit stale ticks.
                self.stats.record_missed_deadline();
                next_tick = now;
            }
            let tick_start = Instant::now();
            next_tick += self.period;

            self.transmit_tick();
            self.manager.tick(tick_start);

            let elapsed = tick_start.elapsed();
            let overran = elapsed > self.period;
            self.stats
                .record_loop(elapsed.as_nanos() as u64, overran);

            window_loops += 1;
            if window_loops >= OVERRUN_WINDOW {
                window_loops = 0;
                let ratio = self.stats.overrun_ratio();
                if ratio > OVERRUN_ALERT_RATIO && !overload_reported {
                    overload_reported = true;
                    self.diag.raise(
                        DiagEvent::new(
                            DiagCode::SchedulerOverloaded,
                            DiagSeverity::Error,
                            "Cyclic",
                            "sustained cycle overrun ratio above threshold",
                        )
                        .with("ratio_pct", format!("{:.1}", ratio * 100.0)),
                    );
                } else if ratio <= OVERRUN_ALERT_RATIO {
                    overload_reported = false;
                }
            }
        }
        log::info!("[Cyclic] sender stopped");
    }

    /// One tick's worth of transmissions.
    fn transmit_tick(&self) {
        let frames = self.manager.collect_tx();
        if frames.is_empty() {
            return;
        }
        let src = self.link.local_mac();
        let mut wire = [0u8; 1522];
        let mut sent = 0u64;
        for frame in &frames {
            let status = ApduStatus {
                cycle_counter: frame.cycle_counter,
                data_status: DATA_STATUS_DEFAULT,
                transfer_status: 0,
            };
            match build_rt_frame(&mut wire, frame.dst, src, frame.frame_id, &frame.payload, status)
            {
                Ok(len) => {
                    if let Err(e) = self.link.send_frame(&wire[..len]) {
                        log::warn!("[Cyclic] tx failed ar={} : {}", frame.ar, e);
                    } else {
                        sent += 1;
                    }
                }
                Err(e) => {
                    log::warn!("[Cyclic] frame build failed ar={} : {}", frame.ar, e);
                }
            }
        }
        self.stats.record_sent(sent);
    }

    fn run_receiver(&self, input_tx: Sender<InputEvent>, dcp_tx: Sender<EthFrame>) {
        log::info!("[Cyclic] receiver started");
        while !self.stop.load(Ordering::Acquire) {
            let frame = match self.link.poll(RECV_POLL) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("[Cyclic] rx poll failed: {}", e);
                    std::thread::sleep(RECV_POLL);
                    continue;
                }
            };
            self.handle_frame(frame, &input_tx, &dcp_tx);
        }
        log::info!("[Cyclic] receiver stopped");
    }

    /// Demultiplex one received frame. Factored out for deterministic tests.
    pub fn handle_frame(
        &self,
        frame: EthFrame,
        input_tx: &Sender<InputEvent>,
        dcp_tx: &Sender<EthFrame>,
    ) {
        let parsed = match parse_rt_frame(&frame.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.stats.record_dropped();
                log::debug!("[Cyclic] dropping malformed frame: {}", e);
                #[cfg(feature = "pn-hexdump")]
                log::debug!(
                    "[Cyclic] offending frame:\n{}",
                    crate::logging::hexdump(&frame.data)
                );
                return;
            }
        };
        self.stats.record_received();

        match classify_frame_id(parsed.frame_id) {
            FrameClass::Dcp => {
                // DCP worker consumes the complete frame (it needs the
                // source MAC).
                let _ = dcp_tx.send(frame);
            }
            FrameClass::RtClass1 => {
                let now = Instant::now();
                match self.manager.on_input_frame(
                    parsed.frame_id,
                    parsed.payload,
                    parsed.status.cycle_counter,
                    now,
                ) {
                    Ok(Some(ar)) => {
                        let _ = input_tx.try_send(InputEvent { ar, at: now });
                    }
                    Ok(None) => {
                        // Not one of ours; normal on a shared segment.
                    }
                    Err(e) => {
                        self.stats.record_dropped();
                        log::debug!(
                            "[Cyclic] input frame {:#06x} rejected: {}",
                            parsed.frame_id,
                            e
                        );
                    }
                }
            }
            FrameClass::Alarm => {
                log::debug!("[Cyclic] rta alarm frame id={:#06x}", parsed.frame_id);
            }
            FrameClass::Other => {
                log::debug!("[Cyclic] ignoring frame id={:#06x}", parsed.frame_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CycleTiming;
    use crate::core::types::{IpParams, MacAddr};
    use crate::discovery::DeviceInfo;
    use crate::protocol::blocks::{ExpectedSlot, IoDirection};
    use crate::rpc::RpcClient;
    use crate::transport::loopback::LoopbackLink;
    use crate::transport::udp::PairEndpoint;
    use crossbeam_channel::unbounded;

    const CTRL_MAC: MacAddr = MacAddr([0x02, 0, 0, 0xAA, 0xBB, 0xCC]);
    const DEV_MAC: MacAddr = MacAddr([0x00, 0x0A, 0xCD, 0x01, 0x02, 0x03]);

    fn engine_with_manager() -> (Arc<CyclicEngine>, Arc<ArManager>, Arc<dyn Link>) {
        let (ctrl_link, dev_link) = LoopbackLink::pair(CTRL_MAC, DEV_MAC);
        let (rpc_ctrl, _rpc_dev) = PairEndpoint::pair();
        let manager = Arc::new(ArManager::new(
            Arc::new(RpcClient::new(Arc::new(rpc_ctrl))),
            Arc::new(DiagHub::new()),
        ));
        let engine = Arc::new(CyclicEngine::new(
            Arc::new(ctrl_link),
            Arc::clone(&manager),
            Arc::new(CycleStats::new()),
            Arc::new(DiagHub::new()),
            Duration::from_millis(1),
            Arc::new(AtomicBool::new(false)),
        ));
        (engine, manager, Arc::new(dev_link))
    }

    #[test]
    fn test_malformed_frame_counted_dropped() {
        let (engine, _manager, _dev) = engine_with_manager();
        let (input_tx, _input_rx) = unbounded();
        let (dcp_tx, _dcp_rx) = unbounded();
        engine.handle_frame(
            EthFrame {
                data: vec![0u8; 10],
            },
            &input_tx,
            &dcp_tx,
        );
        assert_eq!(engine.stats.snapshot().frames_dropped, 1);
        assert_eq!(engine.stats.snapshot().frames_received, 0);
    }

    #[test]
    fn test_dcp_frames_forwarded() {
        let (engine, _manager, _dev) = engine_with_manager();
        let (input_tx, _input_rx) = unbounded();
        let (dcp_tx, dcp_rx) = unbounded();

        let mut wire = [0u8; 128];
        let len = build_rt_frame(
            &mut wire,
            CTRL_MAC,
            DEV_MAC,
            crate::config::FRAME_ID_DCP_IDENT_RSP,
            &[0u8; 40],
            ApduStatus::default(),
        )
        .expect("build");
        engine.handle_frame(
            EthFrame {
                data: wire[..len].to_vec(),
            },
            &input_tx,
            &dcp_tx,
        );
        assert!(dcp_rx.try_recv().is_ok());
    }

    #[test]
    fn test_unknown_rt_frame_ignored() {
        let (engine, _manager, _dev) = engine_with_manager();
        let (input_tx, input_rx) = unbounded();
        let (dcp_tx, _dcp_rx) = unbounded();

        let mut wire = [0u8; 128];
        let len = build_rt_frame(
            &mut wire,
            CTRL_MAC,
            DEV_MAC,
            0x8001,
            &[0u8; 40],
            ApduStatus::default(),
        )
        .expect("build");
        engine.handle_frame(
            EthFrame {
                data: wire[..len].to_vec(),
            },
            &input_tx,
            &dcp_tx,
        );
        assert!(input_rx.try_recv().is_err());
        assert_eq!(engine.stats.snapshot().frames_received, 1);
    }

    #[test]
    fn test_sender_emits_for_run_ar() {
        // Walk an AR to RUN by hand (no RPC): exercise collect_tx + wire
        // format through a single transmit tick.
        let (engine, manager, dev_link) = engine_with_manager();
        let device = DeviceInfo {
            station_name: "intake-rtu-01".into(),
            vendor_id: 0x0272,
            device_id: 0x0C05,
            mac: DEV_MAC,
            ip: IpParams::new([192, 168, 1, 50], [255, 255, 255, 0], [192, 168, 1, 1]),
            last_seen: Instant::now(),
        };
        let slots = vec![ExpectedSlot {
            slot: 1,
            subslot: 1,
            module_ident: 0x31,
            submodule_ident: 0x02,
            direction: IoDirection::Output,
            data_length: 4,
        }];
        let _id = manager
            .create_ar(&device, slots, CycleTiming::default())
            .expect("create ar");
        // No AR in RUN yet: a tick transmits nothing.
        engine.transmit_tick();
        assert!(dev_link
            .poll(Duration::from_millis(20))
            .expect("poll")
            .is_none());
        assert_eq!(engine.stats.snapshot().frames_sent, 0);
    }
}
