// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! hpnc-shm-viewer - Inspect the HPNC shared-state segment
//!
//! Read-only seqlock consumer: maps the segment the core publishes and
//! prints RTU, sensor and alarm summaries. The reference implementation of
//! the collaborator side of the IPC contract.

#![cfg_attr(not(target_os = "linux"), allow(unused))]

use clap::Parser;
use colored::*;
use std::sync::Arc;
use std::time::Duration;

#[cfg(target_os = "linux")]
use hpnc::shm::ShmSegment;
use hpnc::shm::{layout, Segment, ShmReader, Snapshot};

/// Inspect the HPNC shared-state segment
#[derive(Parser, Debug)]
#[command(name = "hpnc-shm-viewer")]
#[command(version = "0.1.0")]
#[command(about = "Inspect the HPNC shared-state segment")]
struct Args {
    /// Segment name (with leading slash, e.g. /hpnc_state)
    #[arg(default_value = "/hpnc_state")]
    segment: String,

    /// Refresh continuously at this interval in milliseconds
    #[arg(short, long)]
    watch: Option<u64>,

    /// Also dump per-slot sensor values for this RTU row
    #[arg(short, long)]
    row: Option<usize>,
}

fn state_name(state: u8) -> &'static str {
    match state {
        0 => "PRIMED",
        1 => "CONNECT_REQ_SENT",
        2 => "CONNECT_RSP_RECEIVED",
        3 => "PRM_END_SENT",
        4 => "APP_READY_RECEIVED",
        5 => "RUN",
        6 => "REL_SENT",
        7 => "CLOSED",
        _ => "FAULT",
    }
}

fn health_name(health: u8) -> ColoredString {
    match health {
        0 => "healthy".green(),
        1 => "degraded".yellow(),
        2 => "failed".red(),
        _ => "unknown".dimmed(),
    }
}

fn alarm_state_name(state: u8) -> &'static str {
    match state {
        0 => "NORMAL",
        1 => "ACTIVE_UNACK",
        2 => "ACTIVE_ACK",
        _ => "CLEARED_UNACK",
    }
}

fn print_snapshot(snapshot: &Snapshot, reader: &ShmReader, row: Option<usize>) {
    println!("{}", "=== HPNC shared state ===".bold());
    println!("timestamp_ns: {}", snapshot.timestamp_ns);
    println!();

    println!("{} ({})", "RTUs".bold(), snapshot.rtus.len());
    for (i, rtu) in snapshot.rtus.iter().enumerate() {
        println!(
            "  [{:2}] {:<32} {:<20} {} ip={}.{}.{}.{}",
            i,
            rtu.station_name,
            state_name(rtu.state),
            health_name(rtu.health),
            rtu.ip[0],
            rtu.ip[1],
            rtu.ip[2],
            rtu.ip[3]
        );
    }

    println!();
    println!("{} ({})", "Active alarms".bold(), snapshot.alarms.len());
    for alarm in &snapshot.alarms {
        println!(
            "  #{:<4} rule={:<4} {:<32} slot={:<3} sev={} {:<13} trip={:.3} @ {}",
            alarm.id,
            alarm.rule_id,
            alarm.rtu,
            alarm.slot,
            alarm.severity,
            alarm_state_name(alarm.state),
            alarm.trip_value,
            alarm.trip_ts_ns
        );
    }

    if let Some(row) = row {
        println!();
        println!("{} (row {})", "Sensor values".bold(), row);
        for slot in 0..16 {
            if let Some((value, quality, ms)) = reader.sensor(row, slot) {
                if ms != 0 {
                    println!("  slot {:3}: {:>12.4} ({:?}, {} ms)", slot, value, quality, ms);
                }
            }
        }
    }
}

fn main() {
    let args = Args::parse();

    #[cfg(not(target_os = "linux"))]
    {
        eprintln!("shared-memory segments are only available on Linux");
        std::process::exit(1);
    }

    #[cfg(target_os = "linux")]
    {
        let segment: Arc<dyn Segment> =
            match ShmSegment::open(&args.segment, layout::SEGMENT_LEN) {
                Ok(segment) => Arc::new(segment),
                Err(e) => {
                    eprintln!("cannot open {}: {}", args.segment, e);
                    std::process::exit(1);
                }
            };
        let reader = match ShmReader::open(segment) {
            Ok(reader) => reader,
            Err(e) => {
                eprintln!("not an HPNC state segment: {}", e);
                std::process::exit(1);
            }
        };

        loop {
            let snapshot = reader.snapshot();
            if args.watch.is_some() {
                print!("\x1B[2J\x1B[H"); // clear screen between refreshes
            }
            print_snapshot(&snapshot, &reader, args.row);
            match args.watch {
                Some(interval) => std::thread::sleep(Duration::from_millis(interval)),
                None => break,
            }
        }
    }
}
