//! vmm — pagemap & memory region management
//!
//! Satu `Pagemap` per address space: frame top-level page table + daftar
//! Local Region, dijaga satu lock. Region bertingkat dua:
//!   - `GlobalRegion`  — identitas mapping yang dibagi antar address space:
//!     range, resource, offset, shadow pagemap (rekaman frame kanonik),
//!     daftar Local Region yang menempel.
//!   - `LocalRegion`   — pandangan satu address space: base/length/offset,
//!     protection, flags, back-ref ke Global-nya.
//! Mapping private punya tepat satu Local; mapping shared boleh banyak.
//! Fault anonymous mengisi frame nol ke shadow DAN semua Local yang
//! menempel — itu yang menjaga koherensi MAP_SHARED antar proses.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;
use x86_64::structures::paging::page_table::PageTableEntry;
use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use super::pmm::FrameAllocator;
use super::{PhysWindow, PAGE_SIZE};
use crate::sys::fs::Resource;
use crate::sys::{Error, Kernel};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u64 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u64 {
        const SHARED    = 0x01;
        const PRIVATE   = 0x02;
        const FIXED     = 0x10;
        const ANONYMOUS = 0x20;
    }
}

/// Base mapping anonymous non-fixed pertama tiap address space
pub const MMAP_ANON_BASE: u64 = 0x7100_0000_0000;

/// Flags entry tabel intermediate: longgar, pembatasan di leaf
const TABLE_FLAGS: PageTableFlags = PageTableFlags::from_bits_truncate(
    PageTableFlags::PRESENT.bits()
        | PageTableFlags::WRITABLE.bits()
        | PageTableFlags::USER_ACCESSIBLE.bits(),
);

fn leaf_flags(prot: Protection) -> PageTableFlags {
    let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
    if prot.contains(Protection::WRITE) {
        flags |= PageTableFlags::WRITABLE;
    }
    flags
}

// ---------------------------------------------------------------------------
// Radix walk
// ---------------------------------------------------------------------------

fn level_index(virt: VirtAddr, level: u8) -> usize {
    ((virt.as_u64() >> (12 + 9 * (level as u64 - 1))) & 0x1ff) as usize
}

/// Jalan 4 level ke entry leaf `virt`. Bila `frames` diberikan, tabel
/// intermediate yang hilang dialokasikan di jalan; bila tidak, walk
/// berhenti dan mengembalikan `None`.
///
/// Caller memegang lock pagemap pemilik `top_level`.
fn virt_to_entry<'a>(
    window: PhysWindow,
    top_level: PhysAddr,
    virt: VirtAddr,
    mut frames: Option<&mut FrameAllocator>,
) -> Result<Option<&'a mut PageTableEntry>, Error> {
    let mut table = unsafe { window.table_mut(top_level) };
    for level in [4u8, 3, 2] {
        let entry = &mut table[level_index(virt, level)];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            match frames.as_deref_mut() {
                Some(fa) => {
                    let frame = fa.allocz(1)?;
                    entry.set_addr(frame, TABLE_FLAGS);
                }
                None => return Ok(None),
            }
        }
        table = unsafe { window.table_mut(entry.addr()) };
    }
    Ok(Some(&mut table[level_index(virt, 1)]))
}

// ---------------------------------------------------------------------------
// Pagemap
// ---------------------------------------------------------------------------

pub struct Pagemap {
    top_level: PhysAddr,
    /// Cursor naik untuk mapping anonymous non-fixed berikutnya
    anon_cursor: AtomicU64,
    /// Lock tunggal: menjaga hierarchy page table DAN daftar region
    regions: Mutex<Vec<Arc<LocalRegion>>>,
}

impl Pagemap {
    /// Alokasikan pagemap baru. Bila `alias` diberikan, entry top-level
    /// 256..512 (kernel half) disalin — setiap address space berbagi
    /// tabel kernel yang sama by reference.
    pub fn allocate(
        window: PhysWindow,
        frames: &mut FrameAllocator,
        alias: Option<&Pagemap>,
    ) -> Result<Arc<Self>, Error> {
        let top_level = frames.allocz(1)?;
        if let Some(source) = alias {
            let src = unsafe { window.table_mut(source.top_level) };
            let dst = unsafe { window.table_mut(top_level) };
            for i in 256..512 {
                dst[i] = src[i].clone();
            }
        }
        Ok(Arc::new(Self {
            top_level,
            anon_cursor: AtomicU64::new(MMAP_ANON_BASE),
            regions: Mutex::new(Vec::new()),
        }))
    }

    pub fn top_level(&self) -> PhysAddr {
        self.top_level
    }

    fn invalidate(&self, kernel: &Kernel, virt: VirtAddr) {
        // hanya CPU pemanggil; shootdown antar CPU bukan urusan core ini
        if kernel.platform.active_pagemap() == self.top_level {
            kernel.platform.invalidate_page(virt);
        }
    }

    /// Pasang satu leaf entry, alokasikan tabel intermediate seperlunya
    pub fn map_page(
        &self,
        kernel: &Kernel,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageTableFlags,
    ) -> Result<(), Error> {
        {
            let _guard = self.regions.lock();
            kernel.with_frames(|frames| {
                match virt_to_entry(kernel.window(), self.top_level, virt, Some(frames))? {
                    Some(entry) => {
                        entry.set_addr(phys, flags);
                        Ok(())
                    }
                    None => Err(Error::OutOfMemory),
                }
            })?;
        }
        self.invalidate(kernel, virt);
        Ok(())
    }

    /// Bersihkan satu leaf entry; `true` bila memang ada mapping
    pub fn unmap_page(&self, kernel: &Kernel, virt: VirtAddr) -> bool {
        let existed = {
            let _guard = self.regions.lock();
            match virt_to_entry(kernel.window(), self.top_level, virt, None) {
                Ok(Some(entry)) if entry.flags().contains(PageTableFlags::PRESENT) => {
                    entry.set_unused();
                    true
                }
                _ => false,
            }
        };
        if existed {
            self.invalidate(kernel, virt);
        }
        existed
    }

    /// Terjemahkan alamat virtual ke frame fisik leaf-nya
    pub fn translate(&self, kernel: &Kernel, virt: VirtAddr) -> Option<PhysAddr> {
        let _guard = self.regions.lock();
        match virt_to_entry(kernel.window(), self.top_level, virt, None) {
            Ok(Some(entry)) if entry.flags().contains(PageTableFlags::PRESENT) => {
                Some(entry.addr())
            }
            _ => None,
        }
    }

    /// Local Region yang menutupi `virt`, kalau ada
    pub fn region_at(&self, virt: VirtAddr) -> Option<Arc<LocalRegion>> {
        let addr = virt.as_u64();
        self.regions
            .lock()
            .iter()
            .find(|r| addr >= r.base() && addr < r.base() + r.length())
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Regions
// ---------------------------------------------------------------------------

pub struct GlobalRegion {
    pub base:     u64,
    pub length:   u64,
    pub offset:   u64,
    pub resource: Option<Arc<dyn Resource>>,
    /// Rekaman frame kanonik per page — sumber kebenaran mapping shared
    pub shadow:   Arc<Pagemap>,
    locals:       Mutex<Vec<Arc<LocalRegion>>>,
    /// Resource melaporkan seluruh region sudah resident; fault berikutnya
    /// di region ini diperlakukan sebagai akses liar
    fully_populated: AtomicBool,
}

pub struct LocalRegion {
    pagemap:    Weak<Pagemap>,
    pub global: Arc<GlobalRegion>,
    // base/length/offset atomic: munmap tepi boleh memangkasnya in-place
    base:       AtomicU64,
    length:     AtomicU64,
    offset:     AtomicU64,
    pub prot:   Protection,
    pub flags:  MapFlags,
}

impl LocalRegion {
    fn attach(
        pagemap: &Arc<Pagemap>,
        global: &Arc<GlobalRegion>,
        base: u64,
        length: u64,
        offset: u64,
        prot: Protection,
        flags: MapFlags,
    ) -> Arc<Self> {
        let local = Arc::new(Self {
            pagemap: Arc::downgrade(pagemap),
            global: global.clone(),
            base: AtomicU64::new(base),
            length: AtomicU64::new(length),
            offset: AtomicU64::new(offset),
            prot,
            flags,
        });
        global.locals.lock().push(local.clone());
        pagemap.regions.lock().push(local.clone());
        local
    }

    pub fn base(&self) -> u64 {
        self.base.load(Ordering::SeqCst)
    }

    pub fn length(&self) -> u64 {
        self.length.load(Ordering::SeqCst)
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }
}

/// Pasang satu page ke shadow pagemap sebuah Global Region dan ke setiap
/// Local Region yang menempel. Jalur tunggal yang menjaga koherensi shared.
fn install_page_in_region(
    kernel: &Kernel,
    global: &GlobalRegion,
    virt: VirtAddr,
    phys: PhysAddr,
    prot: Protection,
) -> Result<(), Error> {
    let flags = leaf_flags(prot);
    global.shadow.map_page(kernel, virt, phys, flags)?;
    for local in global.locals.lock().iter() {
        // Local yang sudah dipangkas munmap tidak menutupi alamat ini lagi;
        // memetakan ke sana akan menghidupkan kembali page yang dia lepas
        if virt.as_u64() < local.base() || virt.as_u64() >= local.base() + local.length() {
            continue;
        }
        if let Some(pagemap) = local.pagemap.upgrade() {
            pagemap.map_page(kernel, virt, phys, flags)?;
        }
    }
    Ok(())
}

/// Jalan masuk implementasi `Resource::populate_page`: pasang frame hasil
/// baca file untuk `memory_page` ke shadow region dan semua Local-nya.
pub fn install_region_page(
    kernel: &Kernel,
    region: &LocalRegion,
    memory_page: u64,
    phys: PhysAddr,
) -> Result<(), Error> {
    install_page_in_region(
        kernel,
        &region.global,
        VirtAddr::new(memory_page * PAGE_SIZE),
        phys,
        region.prot,
    )
}

// ---------------------------------------------------------------------------
// mmap / munmap
// ---------------------------------------------------------------------------

fn new_global(
    kernel: &Kernel,
    base: u64,
    length: u64,
    offset: u64,
    resource: Option<Arc<dyn Resource>>,
) -> Result<Arc<GlobalRegion>, Error> {
    let shadow = kernel.with_frames(|fa| Pagemap::allocate(kernel.window(), fa, None))?;
    Ok(Arc::new(GlobalRegion {
        base,
        length,
        offset,
        resource,
        shadow,
        locals: Mutex::new(Vec::new()),
        fully_populated: AtomicBool::new(false),
    }))
}

/// Buat mapping baru di `pagemap`. Tidak ada page yang dipasang di sini —
/// populasi terjadi saat fault pertama.
pub fn mmap(
    kernel: &Kernel,
    pagemap: &Arc<Pagemap>,
    addr: u64,
    length: u64,
    prot: Protection,
    flags: MapFlags,
    resource: Option<Arc<dyn Resource>>,
    offset: u64,
) -> Result<VirtAddr, Error> {
    if length == 0 || length % PAGE_SIZE != 0 {
        return Err(Error::InvalidArgument);
    }
    if flags.contains(MapFlags::SHARED) == flags.contains(MapFlags::PRIVATE) {
        return Err(Error::InvalidArgument);
    }
    if flags.contains(MapFlags::ANONYMOUS) != resource.is_none() {
        return Err(Error::InvalidArgument);
    }

    let base = if flags.contains(MapFlags::FIXED) {
        if addr % PAGE_SIZE != 0 {
            return Err(Error::InvalidArgument);
        }
        addr
    } else {
        // bump cursor; satu guard page di antara mapping
        pagemap.anon_cursor.fetch_add(length + PAGE_SIZE, Ordering::SeqCst)
    };

    let global = new_global(kernel, base, length, offset, resource)?;
    LocalRegion::attach(pagemap, &global, base, length, offset, prot, flags);

    log::debug!(
        "vmm: mmap {:#x}..{:#x} prot={:?} flags={:?}",
        base,
        base + length,
        prot,
        flags
    );
    Ok(VirtAddr::new(base))
}

/// Varian eager untuk mapping fisik fixed (setup kernel): region dibuat
/// dan SEMUA page-nya langsung dipasang lewat jalur shared-install.
pub fn mmap_range(
    kernel: &Kernel,
    pagemap: &Arc<Pagemap>,
    virt: u64,
    phys: u64,
    length: u64,
    prot: Protection,
    flags: MapFlags,
) -> Result<(), Error> {
    if length == 0 || virt % PAGE_SIZE != 0 || phys % PAGE_SIZE != 0 {
        return Err(Error::InvalidArgument);
    }
    let length = super::div_roundup(length, PAGE_SIZE) * PAGE_SIZE;
    let flags = flags | MapFlags::ANONYMOUS;

    let global = new_global(kernel, virt, length, 0, None)?;
    LocalRegion::attach(pagemap, &global, virt, length, 0, prot, flags);

    let mut at = 0;
    while at < length {
        install_page_in_region(
            kernel,
            &global,
            VirtAddr::new(virt + at),
            PhysAddr::new(phys + at),
            prot,
        )?;
        at += PAGE_SIZE;
    }
    Ok(())
}

/// Lepas mapping [addr, addr+length). Range yang akan membelah satu region
/// jadi dua ditolak SEBELUM ada page yang dilepas. Potongan tepi memangkas
/// region in-place; cakupan penuh melepas region dan — bila Local terakhir —
/// frame/resource di belakangnya. Range tanpa region adalah no-op sukses.
pub fn munmap(
    kernel: &Kernel,
    pagemap: &Arc<Pagemap>,
    addr: u64,
    length: u64,
) -> Result<(), Error> {
    if length == 0 || length % PAGE_SIZE != 0 || addr % PAGE_SIZE != 0 {
        return Err(Error::InvalidArgument);
    }
    let end = addr + length;

    // Snapshot region yang overlap; validasi split dulu, baru mutasi
    let overlapping: Vec<Arc<LocalRegion>> = pagemap
        .regions
        .lock()
        .iter()
        .filter(|r| addr < r.base() + r.length() && end > r.base())
        .cloned()
        .collect();
    if overlapping.is_empty() {
        return Ok(());
    }
    for region in &overlapping {
        let (rbase, rend) = (region.base(), region.base() + region.length());
        if addr.max(rbase) > rbase && end.min(rend) < rend {
            return Err(Error::WouldSplitRegion);
        }
    }

    for region in overlapping {
        let (rbase, rend) = (region.base(), region.base() + region.length());
        let lo = addr.max(rbase);
        let hi = end.min(rend);

        let mut page = lo;
        while page < hi {
            pagemap.unmap_page(kernel, VirtAddr::new(page));
            page += PAGE_SIZE;
        }

        if lo == rbase && hi == rend {
            detach_region(kernel, pagemap, &region)?;
        } else if lo == rbase {
            // pangkas awal
            let cut = hi - lo;
            region.base.store(hi, Ordering::SeqCst);
            region.length.fetch_sub(cut, Ordering::SeqCst);
            region.offset.fetch_add(cut, Ordering::SeqCst);
        } else {
            // pangkas akhir
            region.length.fetch_sub(hi - lo, Ordering::SeqCst);
        }
        log::debug!("vmm: munmap {:#x}..{:#x}", lo, hi);
    }
    Ok(())
}

/// Lepas satu Local Region utuh dari pagemap-nya. Kalau ini Local terakhir
/// Global-nya, backing ikut dilepas: frame anonymous dibebaskan lewat
/// shadow pagemap, resource diberi tahu lewat hook-nya.
fn detach_region(
    kernel: &Kernel,
    pagemap: &Arc<Pagemap>,
    region: &Arc<LocalRegion>,
) -> Result<(), Error> {
    // urutan lock: daftar locals Global dulu, baru daftar region pagemap —
    // sama dengan jalur attach/install
    let global = &region.global;
    let last = {
        let mut locals = global.locals.lock();
        locals.retain(|r| !Arc::ptr_eq(r, region));
        locals.is_empty()
    };
    pagemap
        .regions
        .lock()
        .retain(|r| !Arc::ptr_eq(r, region));
    if !last {
        return Ok(());
    }

    match &global.resource {
        Some(resource) => {
            resource.release_mapping(kernel, region)?;
            // frame milik resource; hanya tabel shadow yang dibebaskan
            free_table_level(kernel, global.shadow.top_level, 4, false);
        }
        None => {
            // anonymous: frame DAN tabel shadow dibebaskan sekaligus
            free_table_level(kernel, global.shadow.top_level, 4, true);
        }
    }
    Ok(())
}

/// Bebaskan satu level hierarchy page table secara rekursif; `free_leaves`
/// menentukan apakah frame yang ditunjuk leaf ikut dikembalikan ke pool.
fn free_table_level(kernel: &Kernel, frame: PhysAddr, level: u8, free_leaves: bool) {
    let table = unsafe { kernel.window().table_mut(frame) };
    for entry in table.iter_mut() {
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            continue;
        }
        if level > 1 {
            free_table_level(kernel, entry.addr(), level - 1, free_leaves);
        } else if free_leaves {
            kernel.with_frames(|fa| fa.free(entry.addr(), 1));
        }
        entry.set_unused();
    }
    kernel.with_frames(|fa| fa.free(frame, 1));
}

// ---------------------------------------------------------------------------
// Lifecycle: new / fork / erase
// ---------------------------------------------------------------------------

/// Pagemap user baru: kernel half di-alias dari pagemap kernel
pub fn new_pagemap(kernel: &Kernel) -> Result<Arc<Pagemap>, Error> {
    kernel.with_frames(|fa| Pagemap::allocate(kernel.window(), fa, Some(kernel.kernel_pagemap())))
}

/// Duplikasi address space untuk fork.
///
/// - shared: Global (dan shadow-nya) yang SAMA ditempeli Local baru, leaf
///   yang sudah resident disalin entry-nya — koheren by construction;
/// - private anonymous: Global + shadow baru, isi page yang resident
///   diduplikasi eager ke frame segar;
/// - private file-backed: Global + shadow baru, resource diberi kesempatan
///   mengisi ulang lewat hook attach-nya.
pub fn fork_pagemap(kernel: &Kernel, old: &Arc<Pagemap>) -> Result<Arc<Pagemap>, Error> {
    let new = new_pagemap(kernel)?;
    new.anon_cursor
        .store(old.anon_cursor.load(Ordering::SeqCst), Ordering::SeqCst);

    let snapshot: Vec<Arc<LocalRegion>> = old.regions.lock().clone();
    for region in snapshot {
        let (base, length, offset) = (region.base(), region.length(), region.offset());

        if region.flags.contains(MapFlags::SHARED) {
            let new_local = LocalRegion::attach(
                &new,
                &region.global,
                base,
                length,
                offset,
                region.prot,
                region.flags,
            );
            // salin leaf yang sudah resident ke pandangan anak
            let mut page = base;
            while page < base + length {
                let virt = VirtAddr::new(page);
                if let Some(phys) = old.translate(kernel, virt) {
                    new.map_page(kernel, virt, phys, leaf_flags(new_local.prot))?;
                }
                page += PAGE_SIZE;
            }
        } else if region.flags.contains(MapFlags::ANONYMOUS) {
            let global = new_global(kernel, base, length, offset, None)?;
            LocalRegion::attach(&new, &global, base, length, offset, region.prot, region.flags);
            // duplikasi eager: tiap page resident dapat frame segar
            let mut page = base;
            while page < base + length {
                let virt = VirtAddr::new(page);
                if let Some(src) = old.translate(kernel, virt) {
                    let dst = kernel.with_frames(|fa| fa.alloc(1))?;
                    kernel.window().copy_frame(dst, src);
                    install_page_in_region(kernel, &global, virt, dst, region.prot)?;
                }
                page += PAGE_SIZE;
            }
        } else {
            let resource = region.global.resource.clone();
            let global = new_global(kernel, base, length, offset, resource)?;
            let new_local = LocalRegion::attach(
                &new,
                &global,
                base,
                length,
                offset,
                region.prot,
                region.flags,
            );
            if let Some(resource) = &global.resource {
                resource.attach_mapping(kernel, &new_local)?;
            }
        }
    }
    Ok(new)
}

/// Bongkar address space: semua region di-munmap, lalu sisa leaf user half
/// (stack thread yang dipetakan di luar region), tabel intermediate user
/// half, dan frame top-level dibebaskan. Alias kernel half tidak pernah
/// disentuh.
pub fn erase_pagemap(kernel: &Kernel, pagemap: &Arc<Pagemap>) -> Result<(), Error> {
    let snapshot: Vec<Arc<LocalRegion>> = pagemap.regions.lock().clone();
    for region in snapshot {
        munmap(kernel, pagemap, region.base(), region.length())?;
    }

    let top = unsafe { kernel.window().table_mut(pagemap.top_level) };
    for i in 0..256 {
        let entry = &mut top[i];
        if entry.flags().contains(PageTableFlags::PRESENT) {
            free_table_level(kernel, entry.addr(), 3, true);
            entry.set_unused();
        }
    }
    kernel.with_frames(|fa| fa.free(pagemap.top_level, 1));
    Ok(())
}

// ---------------------------------------------------------------------------
// Page fault
// ---------------------------------------------------------------------------

/// Selesaikan satu page fault di `pagemap`. Alamat di luar semua region
/// mengembalikan `BadAddress` — kontraknya fatal untuk proses yang fault,
/// bukan untuk kernel.
pub fn handle_page_fault(
    kernel: &Kernel,
    pagemap: &Arc<Pagemap>,
    addr: VirtAddr,
) -> Result<(), Error> {
    let region = match pagemap.region_at(addr) {
        Some(region) => region,
        None => {
            log::warn!("vmm: fault at {:#x} outside any region", addr.as_u64());
            return Err(Error::BadAddress);
        }
    };
    let global = &region.global;
    if global.fully_populated.load(Ordering::SeqCst) {
        log::warn!("vmm: fault in retired region at {:#x}", addr.as_u64());
        return Err(Error::BadAddress);
    }

    let memory_page = addr.as_u64() / PAGE_SIZE;
    let file_page = region.offset() / PAGE_SIZE + (memory_page - region.base() / PAGE_SIZE);

    match &global.resource {
        None => {
            let frame = kernel.with_frames(|fa| fa.allocz(1))?;
            install_page_in_region(
                kernel,
                global,
                VirtAddr::new(memory_page * PAGE_SIZE),
                frame,
                region.prot,
            )?;
        }
        Some(resource) => {
            let done = resource.populate_page(kernel, &region, memory_page, file_page)?;
            if done {
                global.fully_populated.store(true, Ordering::SeqCst);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::testutil::test_env;

    #[test]
    fn mapping_roundtrip() {
        let env = test_env(64);
        let kernel = &env.kernel;
        let pm = new_pagemap(kernel).unwrap();

        let virt = VirtAddr::new(0x1000);
        let phys = PhysAddr::new(0x2000);
        pm.map_page(
            kernel,
            virt,
            phys,
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
        )
        .unwrap();
        assert_eq!(pm.translate(kernel, virt), Some(phys));

        assert!(pm.unmap_page(kernel, virt));
        assert_eq!(pm.translate(kernel, virt), None);
        assert!(!pm.unmap_page(kernel, virt));
    }

    #[test]
    fn anonymous_fault_installs_zero_frame() {
        let env = test_env(64);
        let kernel = &env.kernel;
        let pm = new_pagemap(kernel).unwrap();

        let base = mmap(
            kernel,
            &pm,
            0,
            PAGE_SIZE,
            Protection::READ | Protection::WRITE,
            MapFlags::PRIVATE | MapFlags::ANONYMOUS,
            None,
            0,
        )
        .unwrap();

        // belum ada page sebelum fault
        assert_eq!(pm.translate(kernel, base), None);
        handle_page_fault(kernel, &pm, base).unwrap();
        let phys = pm.translate(kernel, base).unwrap();
        let byte = unsafe { *kernel.window().ptr(phys) };
        assert_eq!(byte, 0);
    }

    #[test]
    fn fault_outside_regions_is_bad_address() {
        let env = test_env(64);
        let kernel = &env.kernel;
        let pm = new_pagemap(kernel).unwrap();
        assert_eq!(
            handle_page_fault(kernel, &pm, VirtAddr::new(0xdead_b000)),
            Err(Error::BadAddress)
        );
    }

    #[test]
    fn fork_isolates_private_and_shares_shared() {
        let env = test_env(128);
        let kernel = &env.kernel;
        let parent = new_pagemap(kernel).unwrap();

        let private = mmap(
            kernel,
            &parent,
            0,
            PAGE_SIZE,
            Protection::READ | Protection::WRITE,
            MapFlags::PRIVATE | MapFlags::ANONYMOUS,
            None,
            0,
        )
        .unwrap();
        let shared = mmap(
            kernel,
            &parent,
            0,
            PAGE_SIZE,
            Protection::READ | Protection::WRITE,
            MapFlags::SHARED | MapFlags::ANONYMOUS,
            None,
            0,
        )
        .unwrap();
        handle_page_fault(kernel, &parent, private).unwrap();
        handle_page_fault(kernel, &parent, shared).unwrap();

        let p_private = parent.translate(kernel, private).unwrap();
        unsafe { *kernel.window().ptr(p_private) = 0x11 };

        let child = fork_pagemap(kernel, &parent).unwrap();

        // private: frame anak berbeda, tulisan anak tak terlihat orang tua
        let c_private = child.translate(kernel, private).unwrap();
        assert_ne!(c_private, p_private);
        let copied = unsafe { *kernel.window().ptr(c_private) };
        assert_eq!(copied, 0x11);
        unsafe { *kernel.window().ptr(c_private) = 0x99 };
        assert_eq!(unsafe { *kernel.window().ptr(p_private) }, 0x11);

        // shared: frame yang sama persis di kedua address space
        let p_shared = parent.translate(kernel, shared).unwrap();
        let c_shared = child.translate(kernel, shared).unwrap();
        assert_eq!(p_shared, c_shared);
        unsafe { *kernel.window().ptr(c_shared) = 0x77 };
        assert_eq!(unsafe { *kernel.window().ptr(p_shared) }, 0x77);
    }

    #[test]
    fn shared_fault_after_fork_is_visible_in_both() {
        let env = test_env(128);
        let kernel = &env.kernel;
        let parent = new_pagemap(kernel).unwrap();

        let shared = mmap(
            kernel,
            &parent,
            0,
            2 * PAGE_SIZE,
            Protection::READ | Protection::WRITE,
            MapFlags::SHARED | MapFlags::ANONYMOUS,
            None,
            0,
        )
        .unwrap();
        let child = fork_pagemap(kernel, &parent).unwrap();

        // fault page kedua baru terjadi di anak; jalur install-in-region
        // harus memasangnya ke orang tua juga
        let second = shared + PAGE_SIZE;
        handle_page_fault(kernel, &child, second).unwrap();
        assert_eq!(
            parent.translate(kernel, second),
            child.translate(kernel, second)
        );
        assert!(parent.translate(kernel, second).is_some());
    }

    #[test]
    fn file_backed_fault_asks_the_resource() {
        use crate::sys::testutil::MockResource;
        use core::sync::atomic::Ordering;

        let env = test_env(64);
        let kernel = &env.kernel;
        let pm = new_pagemap(kernel).unwrap();
        let resource = Arc::new(MockResource::default());

        // offset 2 page ke dalam file
        let base = mmap(
            kernel,
            &pm,
            0,
            2 * PAGE_SIZE,
            Protection::READ,
            MapFlags::PRIVATE,
            Some(resource.clone()),
            2 * PAGE_SIZE,
        )
        .unwrap();

        handle_page_fault(kernel, &pm, base + PAGE_SIZE).unwrap();
        assert_eq!(resource.populated.load(Ordering::SeqCst), 1);
        // page kedua mapping = page ketiga file
        assert_eq!(resource.last_file_page.load(Ordering::SeqCst), 3);
        assert!(pm.translate(kernel, base + PAGE_SIZE).is_some());
        assert!(pm.translate(kernel, base).is_none());
    }

    #[test]
    fn munmap_rejects_middle_split() {
        let env = test_env(64);
        let kernel = &env.kernel;
        let pm = new_pagemap(kernel).unwrap();

        let base = mmap(
            kernel,
            &pm,
            0,
            3 * PAGE_SIZE,
            Protection::READ | Protection::WRITE,
            MapFlags::PRIVATE | MapFlags::ANONYMOUS,
            None,
            0,
        )
        .unwrap();
        for i in 0..3 {
            handle_page_fault(kernel, &pm, base + i * PAGE_SIZE).unwrap();
        }

        assert_eq!(
            munmap(kernel, &pm, base.as_u64() + PAGE_SIZE, PAGE_SIZE),
            Err(Error::WouldSplitRegion)
        );
        // ketiga page tetap terpasang
        for i in 0..3 {
            assert!(pm.translate(kernel, base + i * PAGE_SIZE).is_some());
        }
    }

    #[test]
    fn munmap_trims_edges_and_releases_full_cover() {
        let env = test_env(64);
        let kernel = &env.kernel;
        let pm = new_pagemap(kernel).unwrap();

        let base = mmap(
            kernel,
            &pm,
            0,
            3 * PAGE_SIZE,
            Protection::READ | Protection::WRITE,
            MapFlags::PRIVATE | MapFlags::ANONYMOUS,
            None,
            0,
        )
        .unwrap();
        for i in 0..3 {
            handle_page_fault(kernel, &pm, base + i * PAGE_SIZE).unwrap();
        }

        // pangkas awal
        munmap(kernel, &pm, base.as_u64(), PAGE_SIZE).unwrap();
        assert_eq!(pm.translate(kernel, base), None);
        let region = pm.region_at(base + PAGE_SIZE).unwrap();
        assert_eq!(region.base(), base.as_u64() + PAGE_SIZE);
        assert_eq!(region.length(), 2 * PAGE_SIZE);
        assert_eq!(region.offset(), PAGE_SIZE);

        // cakupan penuh sisanya: region hilang
        munmap(kernel, &pm, base.as_u64() + PAGE_SIZE, 2 * PAGE_SIZE).unwrap();
        assert!(pm.region_at(base + PAGE_SIZE).is_none());
        assert_eq!(pm.translate(kernel, base + PAGE_SIZE), None);
    }

    #[test]
    fn trimmed_shared_mapping_stays_unmapped_after_remote_fault() {
        let env = test_env(128);
        let kernel = &env.kernel;
        let parent = new_pagemap(kernel).unwrap();

        let shared = mmap(
            kernel,
            &parent,
            0,
            2 * PAGE_SIZE,
            Protection::READ | Protection::WRITE,
            MapFlags::SHARED | MapFlags::ANONYMOUS,
            None,
            0,
        )
        .unwrap();
        let child = fork_pagemap(kernel, &parent).unwrap();

        // anak memangkas page pertama dari pandangannya sendiri
        munmap(kernel, &child, shared.as_u64(), PAGE_SIZE).unwrap();
        assert_eq!(child.translate(kernel, shared), None);

        // fault orang tua di page itu tidak boleh memasangnya lagi ke anak
        handle_page_fault(kernel, &parent, shared).unwrap();
        assert!(parent.translate(kernel, shared).is_some());
        assert_eq!(child.translate(kernel, shared), None);

        // page kedua masih dibagi dua-duanya
        let second = shared + PAGE_SIZE;
        handle_page_fault(kernel, &child, second).unwrap();
        assert_eq!(
            parent.translate(kernel, second),
            child.translate(kernel, second)
        );
    }

    #[test]
    fn munmap_of_a_hole_is_a_no_op() {
        let env = test_env(64);
        let kernel = &env.kernel;
        let pm = new_pagemap(kernel).unwrap();

        munmap(kernel, &pm, 0xdead_b000, 2 * PAGE_SIZE).unwrap();
        // alignment tetap divalidasi
        assert_eq!(
            munmap(kernel, &pm, 0xdead_b001, PAGE_SIZE),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn erase_returns_every_frame() {
        let env = test_env(64);
        let kernel = &env.kernel;

        // hitung kapasitas pool dengan menguras lalu mengembalikannya
        let mut taken = Vec::new();
        kernel.with_frames(|fa| {
            while let Ok(f) = fa.alloc(1) {
                taken.push(f);
            }
        });
        let capacity = taken.len();
        kernel.with_frames(|fa| {
            for f in taken {
                fa.free(f, 1);
            }
        });

        let pm = new_pagemap(kernel).unwrap();
        let base = mmap(
            kernel,
            &pm,
            0,
            2 * PAGE_SIZE,
            Protection::READ | Protection::WRITE,
            MapFlags::PRIVATE | MapFlags::ANONYMOUS,
            None,
            0,
        )
        .unwrap();
        handle_page_fault(kernel, &pm, base).unwrap();
        handle_page_fault(kernel, &pm, base + PAGE_SIZE).unwrap();

        erase_pagemap(kernel, &pm).unwrap();

        let mut taken = Vec::new();
        kernel.with_frames(|fa| {
            while let Ok(f) = fa.alloc(1) {
                taken.push(f);
            }
        });
        assert_eq!(taken.len(), capacity);
        kernel.with_frames(|fa| {
            for f in taken {
                fa.free(f, 1);
            }
        });
    }
}
