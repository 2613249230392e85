//! Differentiated system description table and sleep-state extraction.
//!
//! [`scan_sleep_states`] is a byte pattern match, not an AML interpreter.
//! It recognises exactly one encoding of `Name (_Sx_, Package () { a, b, .. })`:
//!
//! ```text
//! 08 [5C] '_' 'S' x '_' 12 <pkglen> <count> [0A] a [0A] b
//! ```
//!
//! Firmware that encodes the package any other way (a method, multi-byte
//! integers, a longer path prefix) reads as "not found", or as wrong values
//! when the bytes happen to line up.

use alloc::vec::Vec;

use doomos_lib::{klog_debug, klog_info};

use crate::error::AcpiResult;
use crate::tables::{Signature, Table};

const AML_NAME_OP: u8 = 0x08;
const AML_ROOT_PREFIX: u8 = b'\\';
const AML_PACKAGE_OP: u8 = 0x12;
const AML_BYTE_PREFIX: u8 = 0x0A;

/// SLP_TYP field position in PM1 control.
pub const SLP_TYP_SHIFT: u16 = 10;

pub const SLEEP_STATE_COUNT: usize = 6;

/// PM1a/PM1b control values for one sleep state, already shifted into the
/// SLP_TYP field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SleepType {
    pub a: u16,
    pub b: u16,
}

/// Per-state scan result for S0 through S5.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SleepStates([Option<SleepType>; SLEEP_STATE_COUNT]);

impl SleepStates {
    pub fn get(&self, state: usize) -> Option<SleepType> {
        self.0.get(state).copied().flatten()
    }

    #[inline]
    pub fn s5(&self) -> Option<SleepType> {
        self.get(5)
    }

    pub fn found(&self) -> usize {
        self.0.iter().flatten().count()
    }
}

fn sleep_name(state: usize) -> [u8; 4] {
    [b'_', b'S', b'0' + state as u8, b'_']
}

/// One operand: an optional byte-constant prefix followed by the value byte.
/// Returns the shifted value and the position just past it.
fn read_operand(aml: &[u8], pos: usize) -> Option<(u16, usize)> {
    let mut pos = pos;
    if *aml.get(pos)? == AML_BYTE_PREFIX {
        pos += 1;
    }
    let value = *aml.get(pos)? as u16;
    Some((value << SLP_TYP_SHIFT, pos + 1))
}

fn match_state(aml: &[u8], name: &[u8; 4]) -> Option<SleepType> {
    let at = aml.windows(name.len()).position(|window| window == name)?;

    let named = match at {
        0 => false,
        1 => aml[0] == AML_NAME_OP,
        _ => {
            aml[at - 1] == AML_NAME_OP
                || (aml[at - 2] == AML_NAME_OP && aml[at - 1] == AML_ROOT_PREFIX)
        }
    };
    if !named || *aml.get(at + 4)? != AML_PACKAGE_OP {
        return None;
    }

    // PkgLength lead byte: bits 7:6 count the extra length bytes. Skip the
    // length bytes and the element count.
    let mut pos = at + 5;
    let lead = *aml.get(pos)?;
    pos += ((lead & 0xC0) >> 6) as usize + 2;

    let (a, pos) = read_operand(aml, pos)?;
    let (b, _) = read_operand(aml, pos)?;
    Some(SleepType { a, b })
}

/// Search `aml` for `_S0_` .. `_S5_` packages. Only the first occurrence of
/// each name is considered.
pub fn scan_sleep_states(aml: &[u8]) -> SleepStates {
    let mut states = SleepStates::default();
    for (state, slot) in states.0.iter_mut().enumerate() {
        *slot = match_state(aml, &sleep_name(state));
        if let Some(sleep) = slot {
            klog_debug!(
                "ACPI: S{} SLP_TYPa={:#x} SLP_TYPb={:#x}",
                state,
                sleep.a,
                sleep.b
            );
        }
    }
    states
}

/// Owned copy of the DSDT body and what was extracted from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DsdtCopy {
    pub phys: u64,
    pub sleep_states: SleepStates,
    aml: Vec<u8>,
}

impl DsdtCopy {
    pub fn parse(table: &Table<'_>) -> AcpiResult<Self> {
        let table = table.expect_signature(Signature::DSDT)?;
        let aml = table.copy_body()?;
        let sleep_states = scan_sleep_states(&aml);
        klog_info!(
            "ACPI: DSDT at {:#x}, {} AML bytes, {} sleep states",
            table.phys,
            aml.len(),
            sleep_states.found()
        );
        Ok(Self {
            phys: table.phys,
            sleep_states,
            aml,
        })
    }

    #[inline]
    pub fn aml(&self) -> &[u8] {
        &self.aml
    }
}
