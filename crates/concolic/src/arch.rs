/// Bare-metal Motorola 68000 family firmware run under QEMU full-system emulation.
pub mod m68k;
