//! The embedded read-only program archive.
//!
//! User executables ride along as multiboot2 boot modules; at boot each
//! module becomes one `{name, bytes}` entry. The archive is the only
//! "filesystem" there is: exec loads from it and readfile copies out of it.

use alloc::string::String;
use alloc::vec::Vec;

use multiboot2::BootInformation;
use spin::Once;

use crate::errors::{KernelError, KernelResult};

pub struct ArchiveEntry {
    pub name: String,
    pub bytes: &'static [u8],
}

pub struct BootArchive {
    entries: Vec<ArchiveEntry>,
}

impl BootArchive {
    pub fn new(entries: Vec<ArchiveEntry>) -> Self {
        BootArchive { entries }
    }

    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies file bytes starting at `offset` into `buf`, returning how
    /// many were copied (short when the file ends first).
    pub fn getbytes(&self, name: &str, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
        let entry = self.entry(name).ok_or(KernelError::NoObjEntry)?;

        if offset >= entry.bytes.len() {
            return Err(KernelError::InvalidOffset);
        }

        let available = entry.bytes.len() - offset;
        let count = buf.len().min(available);
        buf[..count].copy_from_slice(&entry.bytes[offset..offset + count]);

        Ok(count)
    }
}

static ARCHIVE: Once<BootArchive> = Once::new();

/// Builds the archive from the boot modules. A module's command line names
/// its executable; paths are stripped to the final component.
pub fn install(boot_info: &BootInformation) {
    let mut entries = Vec::new();

    for module in boot_info.module_tags() {
        let name = match module.cmdline() {
            Ok(cmdline) => cmdline,
            Err(_) => continue,
        };
        let name = name.rsplit('/').next().unwrap_or(name);
        if name.is_empty() {
            continue;
        }

        let start = module.start_address() as usize;
        let len = (module.end_address() - module.start_address()) as usize;
        // Module memory is direct-mapped and never reclaimed
        let bytes = unsafe { core::slice::from_raw_parts(start as *const u8, len) };

        crate::log_info!("Archive entry '{}' ({} bytes).", name, len);
        entries.push(ArchiveEntry { name: String::from(name), bytes });
    }

    if entries.is_empty() {
        crate::log_warn!("Boot archive is empty; nothing to exec.");
    }

    ARCHIVE.call_once(|| BootArchive::new(entries));
}

pub fn archive() -> &'static BootArchive {
    match ARCHIVE.get() {
        Some(archive) => archive,
        None => crate::kernel_panic!("boot archive used before install"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn sample() -> BootArchive {
        BootArchive::new(vec![
            ArchiveEntry { name: String::from("idle"), bytes: b"IDLEBYTES" },
            ArchiveEntry { name: String::from("init"), bytes: b"INITBYTES!" },
        ])
    }

    #[test]
    fn lookup_by_name() {
        let archive = sample();
        assert!(archive.entry("idle").is_some());
        assert!(archive.entry("shell").is_none());
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn getbytes_copies_and_clamps() {
        let archive = sample();
        let mut buf = [0u8; 4];
        assert_eq!(archive.getbytes("idle", 0, &mut buf), Ok(4));
        assert_eq!(&buf, b"IDLE");

        // Short read at the tail
        assert_eq!(archive.getbytes("idle", 5, &mut buf), Ok(4));
        assert_eq!(&buf, b"YTES");

        let mut big = [0u8; 64];
        assert_eq!(archive.getbytes("init", 0, &mut big), Ok(10));
    }

    #[test]
    fn getbytes_errors() {
        let archive = sample();
        let mut buf = [0u8; 4];
        assert_eq!(
            archive.getbytes("nope", 0, &mut buf),
            Err(KernelError::NoObjEntry)
        );
        assert_eq!(
            archive.getbytes("idle", 9, &mut buf),
            Err(KernelError::InvalidOffset)
        );
    }
}
