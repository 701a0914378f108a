//! pmm — bitmap physical frame allocator
//!
//! Satu bit per frame fisik: bit set = terpakai, bit clear = bebas.
//! Bitmap-nya sendiri diambil dari region usable pertama yang cukup besar.
//! Alokasi first-fit linear dari cursor persisten, dua pass
//! (cursor→akhir lalu 0→akhir) sebelum menyerah.

use bit_field::BitField;
use x86_64::PhysAddr;

use super::{div_roundup, MemoryKind, MemoryMapEntry, PhysWindow, PAGE_SIZE};
use crate::sys::Error;

pub struct FrameAllocator {
    window:      PhysWindow,
    bitmap_base: PhysAddr,
    frame_count: u64,
    cursor:      u64,
}

impl FrameAllocator {
    /// Bangun allocator dari memory map boot protocol.
    ///
    /// Semua frame awalnya ditandai terpakai; bit frame dalam range usable
    /// dibersihkan, kecuali frame yang ditempati bitmap itu sendiri.
    pub fn init(window: PhysWindow, memory_map: &[MemoryMapEntry]) -> Result<Self, Error> {
        let mut top = 0u64;
        for entry in memory_map {
            if entry.kind == MemoryKind::Usable {
                top = top.max(entry.base.as_u64() + entry.length);
            }
        }
        if top == 0 {
            return Err(Error::OutOfMemory);
        }

        let frame_count   = div_roundup(top, PAGE_SIZE);
        let bitmap_bytes  = div_roundup(frame_count, 8);
        let bitmap_frames = div_roundup(bitmap_bytes, PAGE_SIZE);

        // Carve bitmap dari region usable pertama yang muat
        let bitmap_base = memory_map
            .iter()
            .find(|e| e.kind == MemoryKind::Usable && e.length >= bitmap_frames * PAGE_SIZE)
            .map(|e| e.base)
            .ok_or(Error::OutOfMemory)?;

        // Semua terpakai dulu
        unsafe {
            core::ptr::write_bytes(window.ptr(bitmap_base), 0xff, bitmap_bytes as usize);
        }

        let mut allocator = Self {
            window,
            bitmap_base,
            frame_count,
            cursor: 0,
        };

        let bitmap_first = bitmap_base.as_u64() / PAGE_SIZE;
        let bitmap_last  = bitmap_first + bitmap_frames;

        for entry in memory_map {
            if entry.kind != MemoryKind::Usable {
                continue;
            }
            let first = entry.base.as_u64() / PAGE_SIZE;
            let count = entry.length / PAGE_SIZE;
            for frame in first..first + count {
                // frame milik bitmap tetap terpakai
                if frame >= bitmap_first && frame < bitmap_last {
                    continue;
                }
                allocator.set_bit(frame, false);
            }
        }

        log::debug!(
            "pmm: {} frames tracked, bitmap at {:#x} ({} frames)",
            frame_count,
            bitmap_base.as_u64(),
            bitmap_frames
        );

        Ok(allocator)
    }

    fn bit(&self, frame: u64) -> bool {
        let byte = unsafe { *self.window.ptr(self.bitmap_base + frame / 8) };
        byte.get_bit((frame % 8) as usize)
    }

    fn set_bit(&mut self, frame: u64, used: bool) {
        unsafe {
            let ptr = self.window.ptr(self.bitmap_base + frame / 8);
            let mut byte = *ptr;
            byte.set_bit((frame % 8) as usize, used);
            *ptr = byte;
        }
    }

    /// Scan [start, limit) untuk run `count` frame bebas; tandai dan
    /// kembalikan base-nya bila ketemu
    fn scan(&mut self, start: u64, limit: u64, count: u64) -> Option<PhysAddr> {
        let mut run = 0u64;
        let mut frame = start;
        while frame < limit {
            if self.bit(frame) {
                run = 0;
            } else {
                run += 1;
                if run == count {
                    let base = frame + 1 - count;
                    for f in base..base + count {
                        self.set_bit(f, true);
                    }
                    self.cursor = base + count;
                    return Some(PhysAddr::new(base * PAGE_SIZE));
                }
            }
            frame += 1;
        }
        None
    }

    /// Alokasikan `count` frame fisik kontigu
    pub fn alloc(&mut self, count: u64) -> Result<PhysAddr, Error> {
        if count == 0 {
            return Err(Error::InvalidArgument);
        }
        let cursor = self.cursor;
        if let Some(base) = self.scan(cursor, self.frame_count, count) {
            return Ok(base);
        }
        // Pass kedua dari awal; run yang dibebaskan di belakang cursor
        // boleh memanjang melewati cursor lama
        self.scan(0, self.frame_count, count)
            .ok_or(Error::OutOfMemory)
    }

    /// Seperti `alloc` tapi isi frame dinolkan
    pub fn allocz(&mut self, count: u64) -> Result<PhysAddr, Error> {
        let base = self.alloc(count)?;
        self.window.zero_frames(base, count);
        Ok(base)
    }

    /// Kembalikan `count` frame mulai `base` ke pool
    pub fn free(&mut self, base: PhysAddr, count: u64) {
        let first = base.as_u64() / PAGE_SIZE;
        for frame in first..first + count {
            self.set_bit(frame, false);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::mem::{MemoryKind, MemoryMapEntry};
    use crate::sys::testutil::TestRam;

    // 9 frame RAM; frame 0 usable (jadi bitmap), frame 5..=8 usable,
    // sisanya reserved — pool bebas persis {5,6,7,8}
    fn setup() -> (TestRam, FrameAllocator) {
        let ram = TestRam::new(9);
        let memmap = [
            MemoryMapEntry {
                base:   PhysAddr::new(0),
                length: PAGE_SIZE,
                kind:   MemoryKind::Usable,
            },
            MemoryMapEntry {
                base:   PhysAddr::new(5 * PAGE_SIZE),
                length: 4 * PAGE_SIZE,
                kind:   MemoryKind::Usable,
            },
        ];
        let allocator = FrameAllocator::init(ram.window(), &memmap).unwrap();
        (ram, allocator)
    }

    #[test]
    fn first_fit_returns_lowest_run() {
        let (_ram, mut fa) = setup();
        assert_eq!(fa.alloc(3).unwrap(), PhysAddr::new(5 * PAGE_SIZE));
        // frame 8 tersisa sendirian; tidak bisa jadi awal run 3
        assert_eq!(fa.alloc(3), Err(Error::OutOfMemory));
        assert_eq!(fa.alloc(1).unwrap(), PhysAddr::new(8 * PAGE_SIZE));
        assert_eq!(fa.alloc(1), Err(Error::OutOfMemory));
    }

    #[test]
    fn free_behind_cursor_is_found_on_wraparound() {
        let (_ram, mut fa) = setup();
        assert_eq!(fa.alloc(3).unwrap(), PhysAddr::new(5 * PAGE_SIZE));
        fa.free(PhysAddr::new(5 * PAGE_SIZE), 3);
        // cursor sudah lewat frame 5; run {5,6,7,8} hanya ketemu di pass kedua
        assert_eq!(fa.alloc(4).unwrap(), PhysAddr::new(5 * PAGE_SIZE));
    }

    #[test]
    fn allocz_zeroes_contents() {
        let (ram, mut fa) = setup();
        // habiskan pool supaya frame kotor yang dibebaskan pasti dipakai lagi
        let base = fa.alloc(4).unwrap();
        unsafe {
            core::ptr::write_bytes(ram.window().ptr(base), 0xaa, PAGE_SIZE as usize);
        }
        fa.free(base, 1);
        let again = fa.allocz(1).unwrap();
        assert_eq!(again, base);
        let byte = unsafe { *ram.window().ptr(again) };
        assert_eq!(byte, 0);
    }

    #[test]
    fn bitmap_frame_is_never_handed_out() {
        let (_ram, mut fa) = setup();
        for _ in 0..4 {
            let base = fa.alloc(1).unwrap();
            assert_ne!(base, PhysAddr::new(0));
        }
        assert_eq!(fa.alloc(1), Err(Error::OutOfMemory));
    }
}
