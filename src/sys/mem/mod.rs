//! mem — memory management primitives
//!
//! `PhysWindow` adalah satu-satunya terjemahan phys→virt di seluruh crate:
//! higher-half direct map dengan offset tetap. Tidak ada pointer arithmetic
//! ad-hoc di luar sini.

pub mod pmm;
pub mod vmm;

use x86_64::structures::paging::PageTable;
use x86_64::PhysAddr;

pub const PAGE_SIZE: u64 = 4096;

#[inline]
pub const fn div_roundup(value: u64, align: u64) -> u64 {
    (value + align - 1) / align
}

// ---------------------------------------------------------------------------
// Memory map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Usable,
    Reserved,
}

/// Satu entry memory map dari boot protocol, sudah dinormalkan embedder
#[derive(Debug, Clone, Copy)]
pub struct MemoryMapEntry {
    pub base:   PhysAddr,
    pub length: u64,
    pub kind:   MemoryKind,
}

// ---------------------------------------------------------------------------
// PhysWindow
// ---------------------------------------------------------------------------

/// Jendela direct-map: virt = phys + offset. Copyable; setiap subsistem
/// memegang salinan offset yang sama dari `Kernel`.
#[derive(Debug, Clone, Copy)]
pub struct PhysWindow {
    offset: u64,
}

impl PhysWindow {
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Pointer mentah ke byte fisik `phys`
    pub fn ptr(&self, phys: PhysAddr) -> *mut u8 {
        (phys.as_u64() + self.offset) as *mut u8
    }

    /// Pandang satu frame sebagai page table.
    ///
    /// Safety: `frame` harus frame hidup berisi page table; caller menjamin
    /// tidak ada alias &mut lain selama borrow ini (lock pagemap).
    pub unsafe fn table_mut<'a>(&self, frame: PhysAddr) -> &'a mut PageTable {
        &mut *(self.ptr(frame) as *mut PageTable)
    }

    /// Nolkan `count` frame mulai `base`
    pub fn zero_frames(&self, base: PhysAddr, count: u64) {
        unsafe {
            core::ptr::write_bytes(self.ptr(base), 0, (count * PAGE_SIZE) as usize);
        }
    }

    /// Salin isi satu frame penuh
    pub fn copy_frame(&self, dst: PhysAddr, src: PhysAddr) {
        unsafe {
            core::ptr::copy_nonoverlapping(self.ptr(src), self.ptr(dst), PAGE_SIZE as usize);
        }
    }

    /// Tulis byte-slice ke memori fisik
    pub fn write_bytes(&self, phys: PhysAddr, bytes: &[u8]) {
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr(phys), bytes.len());
        }
    }

    /// Tulis satu u64 ke memori fisik (layout stack user)
    pub fn write_u64(&self, phys: PhysAddr, value: u64) {
        unsafe {
            core::ptr::write_unaligned(self.ptr(phys) as *mut u64, value);
        }
    }
}
