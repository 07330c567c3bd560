//! Program loading: the boot-module archive and the ELF32 reader that exec
//! consumes.

pub mod archive;
pub mod elf;
