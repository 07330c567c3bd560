//! The interrupt descriptor table and its gate encodings.

use bit_field::BitField;

use crate::arch::{self, DescriptorTablePointer};
use crate::kcell::KCell;

pub const IDT_ENTRIES: usize = 256;

// Processor exception vectors
pub const IDT_DE: usize = 0; // divide error
pub const IDT_DB: usize = 1; // debug
pub const IDT_BP: usize = 3; // breakpoint
pub const IDT_OF: usize = 4; // overflow
pub const IDT_BR: usize = 5; // bound range
pub const IDT_UD: usize = 6; // invalid opcode
pub const IDT_NM: usize = 7; // device not available
pub const IDT_NP: usize = 11; // segment not present
pub const IDT_SS: usize = 12; // stack fault
pub const IDT_GP: usize = 13; // general protection
pub const IDT_PF: usize = 14; // page fault
pub const IDT_MF: usize = 16; // x87 floating point
pub const IDT_AC: usize = 17; // alignment check
pub const IDT_XF: usize = 19; // SIMD floating point

/// Everything needed to build one IDT entry.
pub struct TrapGate {
    pub segment: u16,
    pub offset: u32,
    pub privilege_level: u8,
}

static IDT: KCell<[u64; IDT_ENTRIES]> = KCell::new([0; IDT_ENTRIES]);

/// Encodes a 32-bit trap gate (interrupts stay enabled in the handler).
pub fn trap_gate_entry(gate: &TrapGate) -> u64 {
    encode_gate(gate, 0xF00)
}

/// Encodes a 32-bit interrupt gate (interrupts masked in the handler).
pub fn interrupt_gate_entry(gate: &TrapGate) -> u64 {
    encode_gate(gate, 0xE00)
}

fn encode_gate(gate: &TrapGate, gate_type: u64) -> u64 {
    let mut entry: u64 = 0;
    entry.set_bits(48..64, (gate.offset >> 16) as u64);
    entry.set_bit(47, true);
    entry.set_bits(45..47, (gate.privilege_level & 0x3) as u64);
    entry.set_bits(32..44, gate_type);
    entry.set_bits(16..32, gate.segment as u64);
    entry.set_bits(0..16, (gate.offset & 0xFFFF) as u64);
    entry
}

/// Stores a gate at the given vector.
pub fn insert(entry: u64, index: usize) {
    unsafe {
        IDT.get()[index] = entry;
    }
}

/// Hands the table to the CPU.
pub fn load() {
    unsafe {
        let idt = IDT.get();
        let ptr = DescriptorTablePointer {
            limit: (core::mem::size_of::<[u64; IDT_ENTRIES]>() - 1) as u16,
            base: idt.as_ptr() as u32,
        };
        arch::load_idt(&ptr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_gate_fields_land_where_the_cpu_looks() {
        let gate = TrapGate {
            segment: 0x08,
            offset: 0xDEAD_BEEF,
            privilege_level: 3,
        };
        let entry = trap_gate_entry(&gate);

        assert_eq!(entry & 0xFFFF, 0xBEEF); // offset low
        assert_eq!((entry >> 48) & 0xFFFF, 0xDEAD); // offset high
        assert_eq!((entry >> 16) & 0xFFFF, 0x08); // segment
        assert_eq!((entry >> 45) & 0x3, 3); // dpl
        assert_eq!((entry >> 47) & 0x1, 1); // present
        assert_eq!((entry >> 40) & 0xF, 0xF); // 32-bit trap gate
    }

    #[test]
    fn interrupt_gate_differs_only_in_type() {
        let gate = TrapGate {
            segment: 0x08,
            offset: 0x1234_5678,
            privilege_level: 0,
        };
        let trap = trap_gate_entry(&gate);
        let int = interrupt_gate_entry(&gate);
        assert_eq!(trap ^ int, 0x1 << 40);
        assert_eq!((int >> 40) & 0xF, 0xE);
    }
}
