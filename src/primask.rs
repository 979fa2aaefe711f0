// src/primask.rs
//! Syslog priority bitmask: one byte of severity bits per facility.
//!
//! Severity/facility comparisons in scripts are compiled down to one of
//! these masks so that the per-message test is a single indexed bit check.
//! The mask is also the compiled state behind `prifilt()`.

use serde::{Deserialize, Serialize};

use crate::CompareOp;

/// Number of real syslog facilities (codes 0..=23).
pub const NUM_FACILITIES: usize = 24;

/// Mask slots: 24 facilities plus one catch-all slot for invalid codes.
pub const MASK_SLOTS: usize = NUM_FACILITIES + 1;

/// Severity bits per facility. `0x00` = matches nothing, `0xFF` = all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriMask(pub [u8; MASK_SLOTS]);

/// How two masks are merged when boolean operators are fused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskCombine {
    And,
    Or,
}

impl Default for PriMask {
    fn default() -> Self {
        PriMask::never()
    }
}

impl PriMask {
    /// Mask that matches no message at all.
    pub fn never() -> Self {
        PriMask([0u8; MASK_SLOTS])
    }

    /// Mask that matches every message; the optimizer's always-true sentinel.
    pub fn always() -> Self {
        PriMask([0xFFu8; MASK_SLOTS])
    }

    pub fn is_always(&self) -> bool {
        self.0.iter().all(|&b| b == 0xFF)
    }

    /// Rewrite the mask for a severity comparison. Every facility slot gets
    /// the same severity bit pattern; facility-specific bits from earlier
    /// writes are overwritten wholesale.
    pub fn set_severity(&mut self, severity: u8, op: CompareOp) {
        let bits = severity_bits(severity, op);
        for slot in self.0.iter_mut() {
            *slot = bits;
        }
    }

    /// Rewrite the mask for a facility comparison. Unlike `set_severity`,
    /// the mask is reset to all-zero first: a facility filter fully
    /// replaces the mask, severity filters are facility-independent.
    pub fn set_facility(&mut self, facility: u8, op: CompareOp) {
        self.0 = [0u8; MASK_SLOTS];
        let fac = facility as usize;
        for (i, slot) in self.0.iter_mut().enumerate().take(NUM_FACILITIES) {
            let selected = match op {
                CompareOp::Eq => i == fac,
                CompareOp::Ne => i != fac,
                CompareOp::Lt => i < fac,
                CompareOp::Le => i <= fac,
                CompareOp::Gt => i > fac,
                CompareOp::Ge => i >= fac,
                _ => false,
            };
            if selected {
                *slot = 0xFF;
            }
        }
    }

    /// Bitwise NOT of every slot.
    pub fn invert(&mut self) {
        for slot in self.0.iter_mut() {
            *slot = !*slot;
        }
    }

    /// Merge `other` into `self`, slot by slot.
    pub fn combine(&mut self, other: &PriMask, op: MaskCombine) {
        for (slot, o) in self.0.iter_mut().zip(other.0.iter()) {
            match op {
                MaskCombine::And => *slot &= o,
                MaskCombine::Or => *slot |= o,
            }
        }
    }

    /// The per-message hot-path test: one index, one bit check. Facility
    /// codes beyond the table map to the catch-all slot.
    #[inline]
    pub fn matches(&self, facility: u8, severity: u8) -> bool {
        let slot = (facility as usize).min(MASK_SLOTS - 1);
        self.0[slot] & (1u8 << (severity & 0x07)) != 0
    }

    /// Parse a classic selector constellation, e.g. `"mail.err"`,
    /// `"*.=info"`, `"kern,daemon.!warning;*.emerg"`.
    ///
    /// A bare severity name selects that severity and all more severe ones
    /// (numerically lower codes), `=sev` selects exactly one, a `!` prefix
    /// removes instead of adding, `none` clears, `*` wildcards either side.
    /// Returns `None` for unknown facility/severity names.
    pub fn parse_selector(selector: &str) -> Option<PriMask> {
        let mut mask = PriMask::never();
        for part in selector.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (facs, mut pri) = part.split_once('.')?;
            let ignore = if let Some(rest) = pri.strip_prefix('!') {
                pri = rest;
                true
            } else {
                false
            };
            let (exact, pri) = if let Some(rest) = pri.strip_prefix('=') {
                (true, rest)
            } else {
                (false, pri)
            };

            let bits: u8 = if pri == "*" {
                0xFF
            } else if pri.eq_ignore_ascii_case("none") {
                0x00
            } else {
                let sev = severity_from_name(pri)?;
                if exact {
                    1u8 << sev
                } else {
                    // "err" means err and everything more severe (<= code).
                    (1u16 << (sev + 1)).wrapping_sub(1) as u8
                }
            };

            for fac in facs.split(',') {
                let fac = fac.trim();
                let slots: Vec<usize> = if fac == "*" {
                    (0..MASK_SLOTS).collect()
                } else {
                    vec![facility_from_name(fac)? as usize]
                };
                for i in slots {
                    if bits == 0x00 && !ignore {
                        // "none" clears the facility outright.
                        mask.0[i] = 0;
                    } else if ignore {
                        mask.0[i] &= !bits;
                    } else {
                        mask.0[i] |= bits;
                    }
                }
            }
        }
        Some(mask)
    }
}

fn severity_bits(severity: u8, op: CompareOp) -> u8 {
    let s = u32::from(severity & 0x07);
    match op {
        CompareOp::Eq => 1u8 << s,
        CompareOp::Ne => !(1u8 << s),
        CompareOp::Lt => ((1u16 << s) - 1) as u8,
        CompareOp::Le => ((1u16 << (s + 1)) - 1) as u8,
        CompareOp::Gt => !(((1u16 << (s + 1)) - 1) as u8),
        CompareOp::Ge => !(((1u16 << s) - 1) as u8),
        // String operators never reach mask specialization.
        _ => 0,
    }
}

/// Severity name table (code 0 = emerg is the most severe).
const SEVERITY_NAMES: &[(&str, u8)] = &[
    ("emerg", 0),
    ("panic", 0),
    ("alert", 1),
    ("crit", 2),
    ("err", 3),
    ("error", 3),
    ("warning", 4),
    ("warn", 4),
    ("notice", 5),
    ("info", 6),
    ("debug", 7),
];

/// Facility name table. Codes 12..=15 carry the conventional ntp/audit
/// assignments; 16..=23 are local0..local7.
const FACILITY_NAMES: &[(&str, u8)] = &[
    ("kern", 0),
    ("user", 1),
    ("mail", 2),
    ("daemon", 3),
    ("auth", 4),
    ("security", 4),
    ("syslog", 5),
    ("lpr", 6),
    ("news", 7),
    ("uucp", 8),
    ("cron", 9),
    ("authpriv", 10),
    ("ftp", 11),
    ("ntp", 12),
    ("audit", 13),
    ("alert", 14),
    ("clock", 15),
    ("local0", 16),
    ("local1", 17),
    ("local2", 18),
    ("local3", 19),
    ("local4", 20),
    ("local5", 21),
    ("local6", 22),
    ("local7", 23),
];

pub fn severity_from_name(name: &str) -> Option<u8> {
    SEVERITY_NAMES
        .iter()
        .find(|(n, _)| name.eq_ignore_ascii_case(n))
        .map(|&(_, code)| code)
}

pub fn facility_from_name(name: &str) -> Option<u8> {
    FACILITY_NAMES
        .iter()
        .find(|(n, _)| name.eq_ignore_ascii_case(n))
        .map(|&(_, code)| code)
}

/// Canonical text form of a severity code. Aliases (panic, error, warn)
/// never come back out; out-of-range codes render as "invalid".
pub fn severity_name(severity: u8) -> &'static str {
    SEVERITY_NAMES
        .iter()
        .find(|&&(_, code)| code == severity)
        .map(|&(name, _)| name)
        .unwrap_or("invalid")
}

/// Canonical text form of a facility code.
pub fn facility_name(facility: u8) -> &'static str {
    FACILITY_NAMES
        .iter()
        .find(|&&(_, code)| code == facility)
        .map(|&(name, _)| name)
        .unwrap_or("invalid")
}
