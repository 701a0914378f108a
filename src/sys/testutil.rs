//! testutil — scaffolding hosted test
//!
//! Buffer heap page-aligned memerankan RAM fisik; offset `PhysWindow`
//! menunjuk ke situ, jadi page table, bitmap frame dan isi page berperilaku
//! persis seperti di hardware. Platform/Vfs/loader digantikan mock.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use x86_64::{PhysAddr, VirtAddr};

use crate::sys::arch::Platform;
use crate::sys::fs::{Auxval, LoadedImage, OpenFlags, ProgramLoader, Resource, Vfs};
use crate::sys::mem::{MemoryKind, MemoryMapEntry, PAGE_SIZE};
use crate::sys::vmm::{self, LocalRegion, Pagemap};
use crate::sys::{BootConfig, Error, Kernel};

// ---------------------------------------------------------------------------
// TestRam
// ---------------------------------------------------------------------------

#[repr(align(4096))]
struct RawFrame([u8; PAGE_SIZE as usize]);

/// RAM fisik pura-pura: frame 0 buffer ada di "alamat fisik" 0
pub struct TestRam {
    frames: Box<[RawFrame]>,
}

impl TestRam {
    pub fn new(frames: usize) -> Self {
        let frames = (0..frames)
            .map(|_| RawFrame([0; PAGE_SIZE as usize]))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { frames }
    }

    pub fn window(&self) -> crate::sys::mem::PhysWindow {
        crate::sys::mem::PhysWindow::new(self.frames.as_ptr() as u64)
    }
}

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockPlatform {
    active:  AtomicU64,
    fs_base: AtomicU64,
    gs_base: AtomicU64,
}

impl Platform for MockPlatform {
    fn arm_oneshot(&self, _vector: u8, _us: u64) {}
    fn end_of_interrupt(&self) {}

    fn switch_pagemap(&self, top_level: PhysAddr) {
        self.active.store(top_level.as_u64(), Ordering::SeqCst);
    }

    fn active_pagemap(&self) -> PhysAddr {
        PhysAddr::new(self.active.load(Ordering::SeqCst))
    }

    fn invalidate_page(&self, _virt: VirtAddr) {}

    fn read_fs_base(&self) -> u64 {
        self.fs_base.load(Ordering::SeqCst)
    }
    fn write_fs_base(&self, base: u64) {
        self.fs_base.store(base, Ordering::SeqCst);
    }
    fn read_gs_base(&self) -> u64 {
        self.gs_base.load(Ordering::SeqCst)
    }
    fn write_gs_base(&self, base: u64) {
        self.gs_base.store(base, Ordering::SeqCst);
    }

    fn load_task_stacks(&self, _kernel_stack_top: VirtAddr, _fault_stack_top: VirtAddr) {}

    fn disable_interrupts(&self) -> bool {
        true
    }
    fn restore_interrupts(&self, _was_enabled: bool) {}

    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

/// Resource file pura-pura: fault mengisi frame nol dan mencatat page
/// file terakhir yang diminta.
#[derive(Default)]
pub struct MockResource {
    pub populated:      AtomicUsize,
    pub last_file_page: AtomicU64,
}

impl Resource for MockResource {
    fn read(&self, _buf: &mut [u8], _offset: u64) -> Result<usize, Error> {
        Ok(0)
    }

    fn write(&self, buf: &[u8], _offset: u64) -> Result<usize, Error> {
        Ok(buf.len())
    }

    fn populate_page(
        &self,
        kernel: &Kernel,
        region: &Arc<LocalRegion>,
        memory_page: u64,
        file_page: u64,
    ) -> Result<bool, Error> {
        let frame = kernel.with_frames(|fa| fa.allocz(1))?;
        vmm::install_region_page(kernel, region, memory_page, frame)?;
        self.populated.fetch_add(1, Ordering::SeqCst);
        self.last_file_page.store(file_page, Ordering::SeqCst);
        Ok(false)
    }
}

pub struct MockVfs;

impl Vfs for MockVfs {
    fn open(&self, path: &str, _flags: OpenFlags, _mode: u32) -> Result<Arc<dyn Resource>, Error> {
        match path {
            "/bin/init" | "/lib/ld.so" => Ok(Arc::new(MockResource::default())),
            _ => Err(Error::NotFound),
        }
    }
}

pub struct MockLoader;

impl ProgramLoader for MockLoader {
    fn load(
        &self,
        _kernel: &Kernel,
        _pagemap: &Arc<Pagemap>,
        _resource: &Arc<dyn Resource>,
        load_bias: u64,
    ) -> Result<LoadedImage, Error> {
        let entry = 0x40_0000 + load_bias;
        Ok(LoadedImage {
            entry: VirtAddr::new(entry),
            aux: Auxval {
                at_entry: entry,
                at_phdr:  entry + 0x40,
                at_phent: 56,
                at_phnum: 3,
            },
            interpreter: None,
        })
    }
}

// ---------------------------------------------------------------------------
// TestEnv
// ---------------------------------------------------------------------------

pub struct TestEnv {
    pub ram:    TestRam,
    pub kernel: Kernel,
}

/// Kernel lengkap di atas `frames` frame RAM pura-pura, satu CPU
pub fn test_env(frames: u64) -> TestEnv {
    let ram = TestRam::new(frames as usize);
    let memory_map = [MemoryMapEntry {
        base:   PhysAddr::new(0),
        length: frames * PAGE_SIZE,
        kind:   MemoryKind::Usable,
    }];
    let kernel = Kernel::new(BootConfig {
        phys_offset: ram.window().offset(),
        memory_map: &memory_map,
        cpu_count: 1,
        platform: Box::new(MockPlatform::default()),
        vfs: Box::new(MockVfs),
        loader: Box::new(MockLoader),
    })
    .unwrap_or_else(|err| panic!("test kernel: {}", err));
    TestEnv { ram, kernel }
}
