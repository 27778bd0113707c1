//! # `/proc/self/pagemap` translation
//!
//! The kernel exposes one 64-bit entry per virtual page of the process. Entry
//! `n` lives at byte offset `n * 8` and describes the page starting at
//! `n * page_size`.
//!
//! Since Linux 4.0 the PFN field reads as zero unless the reader holds
//! `CAP_SYS_ADMIN`; such entries are reported as [`TranslateError::PfnHidden`].

use crate::translate::{TranslateError, Translator};
use bitfield_struct::bitfield;
use rowguard_addresses::{PhysicalAddress, VirtualAddress};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// One entry of `/proc/<pid>/pagemap`.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PagemapEntry {
    /// Page frame number (bits 0..54), valid if present.
    #[bits(55)]
    pub pfn: u64,
    /// PTE is soft-dirty (bit 55).
    pub soft_dirty: bool,
    /// Page is exclusively mapped (bit 56).
    pub exclusive: bool,
    /// Zero (bits 57..60).
    #[bits(4)]
    __reserved: u8,
    /// Page is file-backed or shared anonymous (bit 61).
    pub file_shared: bool,
    /// Page is swapped out (bit 62).
    pub swapped: bool,
    /// Page is present in RAM (bit 63).
    pub present: bool,
}

/// Size in bytes of one pagemap entry.
const ENTRY_SIZE: usize = size_of::<u64>();

/// [`Translator`] backed by a pagemap file of the current process.
#[derive(Debug)]
pub struct PagemapTranslator {
    file: File,
    page_size: usize,
}

impl PagemapTranslator {
    pub const SELF_PATH: &'static str = "/proc/self/pagemap";

    /// Open `/proc/self/pagemap` with the system page size.
    ///
    /// # Errors
    /// Fails if the file cannot be opened.
    pub fn open() -> Result<Self, TranslateError> {
        Self::open_path(Self::SELF_PATH, rustix::param::page_size())
    }

    /// Open a pagemap file at `path` for pages of `page_size` bytes.
    ///
    /// # Errors
    /// Fails if the file cannot be opened.
    pub fn open_path(path: impl AsRef<Path>, page_size: usize) -> Result<Self, TranslateError> {
        let file = File::open(path)?;
        Ok(Self { file, page_size })
    }

    /// Read the raw entry describing the page that contains `va`.
    ///
    /// # Errors
    /// Fails if the entry cannot be read.
    pub fn entry(&self, va: VirtualAddress) -> Result<PagemapEntry, TranslateError> {
        let index = va.as_u64() / self.page_size as u64;
        let mut buf = [0u8; ENTRY_SIZE];
        self.file.read_exact_at(&mut buf, index * ENTRY_SIZE as u64)?;
        Ok(PagemapEntry::from_bits(u64::from_ne_bytes(buf)))
    }
}

impl Translator for PagemapTranslator {
    fn granularity(&self) -> usize {
        self.page_size
    }

    fn translate(&self, va: VirtualAddress) -> Result<PhysicalAddress, TranslateError> {
        let entry = self.entry(va)?;
        if entry.swapped() {
            return Err(TranslateError::Swapped(va));
        }
        if !entry.present() {
            return Err(TranslateError::NotPresent(va));
        }
        if entry.pfn() == 0 {
            return Err(TranslateError::PfnHidden(va));
        }
        let offset = va.as_u64() % self.page_size as u64;
        Ok(PhysicalAddress::from_frame(entry.pfn(), self.page_size) + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn entry_bit_layout() {
        let e = PagemapEntry::from_bits((1 << 63) | (1 << 61) | 0x1234);
        assert!(e.present());
        assert!(e.file_shared());
        assert!(!e.swapped());
        assert!(!e.soft_dirty());
        assert_eq!(e.pfn(), 0x1234);

        let s = PagemapEntry::new().with_swapped(true).with_pfn(7);
        assert_eq!(s.into_bits(), (1 << 62) | 7);
    }

    fn fake_pagemap(entries: &[u64]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "rowguard-pagemap-{}-{}",
            std::process::id(),
            entries.len()
        ));
        let mut f = File::create(&path).unwrap();
        for e in entries {
            f.write_all(&e.to_ne_bytes()).unwrap();
        }
        path
    }

    #[test]
    fn translates_from_a_pagemap_file() {
        let present = 1_u64 << 63;
        let path = fake_pagemap(&[present | 0x10, 0, 1 << 62, present]);
        let t = PagemapTranslator::open_path(&path, 4096).unwrap();

        let pa = t.translate(VirtualAddress::new(0x123)).unwrap();
        assert_eq!(pa, PhysicalAddress::new(0x10_123));
        assert!(matches!(
            t.translate(VirtualAddress::new(0x1000)),
            Err(TranslateError::NotPresent(_))
        ));
        assert!(matches!(
            t.translate(VirtualAddress::new(0x2000)),
            Err(TranslateError::Swapped(_))
        ));
        assert!(matches!(
            t.translate(VirtualAddress::new(0x3000)),
            Err(TranslateError::PfnHidden(_))
        ));
        assert!(matches!(
            t.translate(VirtualAddress::new(0x4000)),
            Err(TranslateError::Io(_))
        ));

        std::fs::remove_file(path).unwrap();
    }
}
