mod architecture;
pub mod registers;

pub use architecture::{M68kSystem, ARCHITECTURE_NAME, EMULATOR_NAME, WORD_SIZE_BITS};
