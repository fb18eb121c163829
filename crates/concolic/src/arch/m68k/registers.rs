use crate::semantics::{RegisterDescriptor, RegisterDictionary};

const DATA_REGISTERS: usize = 8;
const ADDRESS_REGISTERS: usize = 8;

/// Byte offset of the program counter in the register file
pub const PC_OFFSET: usize = 4 * (DATA_REGISTERS + ADDRESS_REGISTERS);

/// Byte offset of the 16-bit status register
pub const SR_OFFSET: usize = PC_OFFSET + 4;

/// Integer register file of the 68000 family: `d0`-`d7`, `a0`-`a7` (`sp` aliases `a7`), `pc`,
/// `sr` and `ccr`. The register file is big-endian so `ccr`, the low byte of `sr`, is stored at
/// the higher offset.
pub fn dictionary() -> RegisterDictionary {
    let mut registers = RegisterDictionary::new("m68k");
    let long = |offset| RegisterDescriptor { offset, nbits: 32 };

    for n in 0..DATA_REGISTERS {
        registers.insert(format!("d{n}"), long(4 * n));
    }

    for n in 0..ADDRESS_REGISTERS {
        registers.insert(format!("a{n}"), long(4 * (DATA_REGISTERS + n)));
    }

    registers.insert("sp", long(4 * (DATA_REGISTERS + ADDRESS_REGISTERS - 1)));
    registers.insert("pc", long(PC_OFFSET));
    registers.insert(
        "sr",
        RegisterDescriptor {
            offset: SR_OFFSET,
            nbits: 16,
        },
    );
    registers.insert(
        "ccr",
        RegisterDescriptor {
            offset: SR_OFFSET + 1,
            nbits: 8,
        },
    );

    registers
}
