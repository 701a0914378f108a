//! sys — Inti kernel subsystems
//!
//! Struktur:
//!   arch/    — CPU context & Platform trait (timer, CR3, TLB, FS/GS)
//!   mem/     — memory management: pmm (frames), vmm (pagemap + regions)
//!   proc/    — process management: process, sched
//!   ipc/     — event primitive (wait/notify)
//!   fs/      — collaborator traits: Resource, Vfs, ProgramLoader

pub mod arch;
pub mod fs;
pub mod ipc;
pub mod mem;
pub mod proc;

// Re-export jalur pendek — sys::pmm::, sys::vmm::, dll
pub use mem::pmm;
pub use mem::vmm;
pub use proc::process;
pub use proc::sched;

#[cfg(test)]
pub(crate) mod testutil;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use spin::{Mutex, Once, RwLock};

use arch::Platform;
use fs::{ProgramLoader, Vfs};
use mem::pmm::FrameAllocator;
use mem::{MemoryMapEntry, PhysWindow};
use proc::process::{Pid, Process, Thread, Tid};
use proc::sched::{CpuLocal, RunQueue, RUN_QUEUE_SLOTS};
use vmm::Pagemap;

// ---------------------------------------------------------------------------
// Error — taksonomi error seluruh core
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Frame allocator kehabisan run frame fisik yang diminta
    OutOfMemory,
    /// Request tidak valid (length 0 / tidak page-aligned, argumen salah)
    InvalidArgument,
    /// Page fault di alamat yang tidak ditutupi region manapun —
    /// kontraknya process-fatal, bukan kernel halt
    BadAddress,
    /// munmap yang akan membelah satu region jadi dua — tidak didukung
    WouldSplitRegion,
    /// waitpid tanpa anak yang cocok
    NoChildren,
    /// Run queue penuh
    QueueFull,
    /// Event sudah mencapai batas listener
    TooManyListeners,
    /// Path/fd/resource tidak ditemukan
    NotFound,
    /// Program loader menolak image
    LoaderFailed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::OutOfMemory => "out of physical memory",
            Error::InvalidArgument => "invalid argument",
            Error::BadAddress => "address not covered by any region",
            Error::WouldSplitRegion => "unmap would split a region",
            Error::NoChildren => "no matching children",
            Error::QueueFull => "run queue full",
            Error::TooManyListeners => "event listener table full",
            Error::NotFound => "not found",
            Error::LoaderFailed => "program loader failed",
        };
        f.write_str(msg)
    }
}

// ---------------------------------------------------------------------------
// BootConfig — semua yang dibutuhkan Kernel::new saat boot
// ---------------------------------------------------------------------------

pub struct BootConfig<'a> {
    /// Offset higher-half direct map: virt = phys + offset
    pub phys_offset: u64,
    /// Memory map dari boot protocol (sudah diterjemahkan embedder)
    pub memory_map: &'a [MemoryMapEntry],
    /// Jumlah CPU yang akan menjalankan scheduler
    pub cpu_count: usize,
    pub platform: Box<dyn Platform>,
    pub vfs: Box<dyn Vfs>,
    pub loader: Box<dyn ProgramLoader>,
}

// ---------------------------------------------------------------------------
// Kernel — context object tunggal, dibangun sekali saat boot
// ---------------------------------------------------------------------------

/// Kernel memiliki seluruh state core: frame allocator, kernel pagemap,
/// tabel proses & thread, run queue dan record per-CPU. Dibangun sekali
/// lewat `Kernel::new`, diterbitkan lewat `init`, diambil lewat `kernel()`.
pub struct Kernel {
    pub platform: Box<dyn Platform>,
    pub vfs: Box<dyn Vfs>,
    pub loader: Box<dyn ProgramLoader>,

    window: PhysWindow,
    frames: Mutex<FrameAllocator>,
    kernel_pagemap: Arc<Pagemap>,

    processes: Mutex<Vec<Option<Arc<Process>>>>,
    threads: RwLock<Vec<Option<Arc<Thread>>>>,
    run_queue: RunQueue,
    cpus: Box<[CpuLocal]>,

    /// PID proses init — penampung anak yatim saat exit
    init_pid: AtomicUsize,
    /// Cursor menurun untuk stack kernel-thread di kernel space
    kernel_stack_cursor: AtomicU64,
}

/// Puncak area stack kernel-thread; turun ke bawah per thread
const KERNEL_STACK_TOP: u64 = 0xffff_ffff_ffff_f000;

impl Kernel {
    pub fn new(config: BootConfig) -> Result<Self, Error> {
        let window = PhysWindow::new(config.phys_offset);
        let mut frames = FrameAllocator::init(window, config.memory_map)?;
        let kernel_pagemap = Pagemap::allocate(window, &mut frames, None)?;

        let cpus = (0..config.cpu_count.max(1))
            .map(CpuLocal::new)
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            platform: config.platform,
            vfs: config.vfs,
            loader: config.loader,
            window,
            frames: Mutex::new(frames),
            kernel_pagemap,
            processes: Mutex::new(Vec::new()),
            threads: RwLock::new(Vec::new()),
            run_queue: RunQueue::new(RUN_QUEUE_SLOTS),
            cpus,
            init_pid: AtomicUsize::new(0),
            kernel_stack_cursor: AtomicU64::new(KERNEL_STACK_TOP),
        })
    }

    pub fn window(&self) -> PhysWindow {
        self.window
    }

    pub fn kernel_pagemap(&self) -> &Arc<Pagemap> {
        &self.kernel_pagemap
    }

    /// Akses frame allocator di bawah lock-nya
    pub fn with_frames<R>(&self, f: impl FnOnce(&mut FrameAllocator) -> R) -> R {
        f(&mut self.frames.lock())
    }

    pub fn run_queue(&self) -> &RunQueue {
        &self.run_queue
    }

    pub fn cpu(&self, id: usize) -> &CpuLocal {
        &self.cpus[id]
    }

    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    // -- tabel proses (slot di-reuse; pid = index) ---------------------------

    pub fn process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.lock().get(pid).and_then(|p| p.clone())
    }

    pub(crate) fn insert_process(&self, build: impl FnOnce(Pid) -> Arc<Process>) -> Arc<Process> {
        let mut table = self.processes.lock();
        let pid = table
            .iter()
            .position(|slot| slot.is_none())
            .unwrap_or_else(|| {
                table.push(None);
                table.len() - 1
            });
        let process = build(pid);
        table[pid] = Some(process.clone());
        process
    }

    pub(crate) fn remove_process(&self, pid: Pid) {
        let mut table = self.processes.lock();
        if let Some(slot) = table.get_mut(pid) {
            *slot = None;
        }
    }

    // -- tabel thread --------------------------------------------------------

    pub fn thread(&self, tid: Tid) -> Option<Arc<Thread>> {
        self.threads.read().get(tid).and_then(|t| t.clone())
    }

    pub(crate) fn insert_thread(&self, build: impl FnOnce(Tid) -> Arc<Thread>) -> Arc<Thread> {
        let mut table = self.threads.write();
        let tid = table
            .iter()
            .position(|slot| slot.is_none())
            .unwrap_or_else(|| {
                table.push(None);
                table.len() - 1
            });
        let thread = build(tid);
        table[tid] = Some(thread.clone());
        thread
    }

    pub(crate) fn remove_thread(&self, tid: Tid) {
        let mut table = self.threads.write();
        if let Some(slot) = table.get_mut(tid) {
            *slot = None;
        }
    }

    // -- init process --------------------------------------------------------

    pub fn set_init_process(&self, pid: Pid) {
        self.init_pid.store(pid, Ordering::SeqCst);
    }

    pub fn init_process(&self) -> Option<Arc<Process>> {
        self.process(self.init_pid.load(Ordering::SeqCst))
    }

    /// Ambil slot stack kernel berikutnya (turun), menyisakan satu guard page
    pub(crate) fn take_kernel_stack_slot(&self, size: u64) -> u64 {
        self.kernel_stack_cursor
            .fetch_sub(size + mem::PAGE_SIZE, Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Singleton — diinisialisasi eksplisit sekali saat boot
// ---------------------------------------------------------------------------

static KERNEL: Once<Kernel> = Once::new();

/// Terbitkan kernel context. Panggil tepat sekali dari boot path.
pub fn init(kernel: Kernel) -> &'static Kernel {
    KERNEL.call_once(|| kernel)
}

/// Ambil kernel context. Panics bila dipanggil sebelum `init`.
pub fn kernel() -> &'static Kernel {
    KERNEL.get().expect("sys::kernel() before sys::init()")
}
