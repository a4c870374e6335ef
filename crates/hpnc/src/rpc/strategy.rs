// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connect strategies for the wire variants device stacks disagree on.
//!
//! A connect is attempted under one strategy record; on timeout or reject
//! the connector moves to the next. The default order puts the variant the
//! majority of fielded RTUs speak first, so a miss costs one connect
//! timeout per step down the list.

use std::time::Duration;

/// Whether request bodies carry the 20-byte NDR args header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdrMode {
    /// Body wrapped in an NDR args header (most stacks).
    Wrapped,
    /// PNIO blocks start the body directly.
    Bare,
}

/// UUID byte order on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UuidFormat {
    /// First three fields byte-swapped (little-endian DREP).
    Swapped,
    /// Fields as stored.
    Stored,
}

/// Which opnum carries the PrmEnd control exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpnumVariant {
    /// Control opnum 0x04 (standard).
    Control,
    /// Record write opnum 0x03 carrying the control block (legacy stacks).
    WriteControl,
}

/// Which submodules the Expected Submodule block enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotScope {
    /// Exactly the slots the device declared.
    Declared,
    /// Declared slots plus the interface/port submodules of slot 0.
    WithInterface,
}

/// Timeout scaling applied to this attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingProfile {
    Default,
    /// Doubled timeouts for devices that park the CM on a slow core.
    Relaxed,
}

impl TimingProfile {
    pub fn scale(&self, base: Duration) -> Duration {
        match self {
            TimingProfile::Default => base,
            TimingProfile::Relaxed => base * 2,
        }
    }
}

/// One connect attempt's wire configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectStrategy {
    pub ndr_mode: NdrMode,
    pub uuid_format: UuidFormat,
    pub opnum_variant: OpnumVariant,
    pub slot_scope: SlotScope,
    pub timing_profile: TimingProfile,
}

impl ConnectStrategy {
    /// Default iteration order; see DESIGN.md for the rationale.
    pub fn default_list() -> Vec<ConnectStrategy> {
        let base = ConnectStrategy {
            ndr_mode: NdrMode::Wrapped,
            uuid_format: UuidFormat::Swapped,
            opnum_variant: OpnumVariant::Control,
            slot_scope: SlotScope::Declared,
            timing_profile: TimingProfile::Default,
        };
        vec![
            base,
            ConnectStrategy {
                uuid_format: UuidFormat::Stored,
                ..base
            },
            ConnectStrategy {
                ndr_mode: NdrMode::Bare,
                ..base
            },
            ConnectStrategy {
                ndr_mode: NdrMode::Bare,
                uuid_format: UuidFormat::Stored,
                ..base
            },
        ]
    }
}

impl std::fmt::Display for ConnectStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ndr={:?} uuid={:?} opnum={:?} slots={:?} timing={:?}",
            self.ndr_mode, self.uuid_format, self.opnum_variant, self.slot_scope,
            self.timing_profile
        )
    }
}
