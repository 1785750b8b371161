//! The RV32 register file and the parts of the ILP32 calling convention the
//! code generator relies on.

/// An architectural integer register, printed with its ABI name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PhysicalRegister {
    Zero,
    Ra,
    Sp,
    Gp,
    Tp,
    T0,
    T1,
    T2,
    S0,
    S1,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
    S10,
    S11,
    T3,
    T4,
    T5,
    T6,
}

use PhysicalRegister::*;

pub const ARGUMENT_REGISTERS: [PhysicalRegister; 8] = [A0, A1, A2, A3, A4, A5, A6, A7];

pub const RETURN_REGISTER: PhysicalRegister = A0;

/// Clobbered by every call.
pub const CALLER_SAVED: [PhysicalRegister; 15] = [
    T0, T1, T2, T3, T4, T5, A0, A1, A2, A3, A4, A5, A6, A7, Ra,
];

/// Preserved across calls; a function that writes one saves it in its frame.
pub const CALLEE_SAVED: [PhysicalRegister; 12] = [S0, S1, S2, S3, S4, S5, S6, S7, S8, S9, S10, S11];

/// Left out of allocation and used by the emitter to materialise frame
/// offsets that do not fit an immediate.
pub const SCRATCH: PhysicalRegister = T6;

/// The order in which the allocator hands out colours. Caller-saved registers
/// come first so short-lived values do not force a save in the prologue.
pub const ALLOCATION_ORDER: [PhysicalRegister; 26] = [
    T0, T1, T2, T3, T4, T5, A0, A1, A2, A3, A4, A5, A6, A7, S0, S1, S2, S3, S4, S5, S6, S7, S8,
    S9, S10, S11,
];

/// Allocation never needs fewer than this many colours: one instruction has
/// at most two spilled sources live at the same time as its destination.
pub const MINIMUM_REGISTER_BUDGET: usize = 3;

impl PhysicalRegister {
    /// Registers the allocator may assign to virtual registers and that
    /// liveness therefore has to track.
    pub fn is_allocatable(self) -> bool {
        ALLOCATION_ORDER.contains(&self)
    }
}

/// Whether `value` fits the signed 12-bit immediate of I-type instructions.
pub fn fits_immediate(value: i64) -> bool {
    (-2048..=2047).contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_print_their_abi_names() {
        assert_eq!(A0.to_string(), "a0");
        assert_eq!(S11.to_string(), "s11");
        assert_eq!(Zero.to_string(), "zero");
    }

    #[test]
    fn reserved_registers_are_not_allocatable() {
        for register in [Zero, Ra, Sp, Gp, Tp, SCRATCH] {
            assert!(!register.is_allocatable(), "{register} must be reserved");
        }

        assert!(CALLEE_SAVED.iter().all(|r| r.is_allocatable()));
    }

    #[test]
    fn immediate_range_is_twelve_bits_signed() {
        assert!(fits_immediate(-2048));
        assert!(fits_immediate(2047));
        assert!(!fits_immediate(2048));
        assert!(!fits_immediate(-2049));
    }
}
