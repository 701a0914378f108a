//! sched — run queue & round-robin per-CPU
//!
//! Run queue: tabel slot berkapasitas tetap berisi thread id, dimutasi
//! compare-and-swap per slot — tanpa lock, tanpa urutan selain posisi.
//! Tiap CPU memegang cursor "slot terakhir dilayani" sendiri dan scan
//! melingkar satu putaran dari situ: round-robin adil atas apa pun yang
//! sedang antre, tanpa prioritas.
//!
//! Thread yang terpilih DIKELUARKAN dari queue (Running = tidak antre);
//! preemption timer memasukkannya lagi, kecuali flag parked-nya diset
//! (blocked di Event atau sedang exit).

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use crate::sys::arch::{CpuContext, SCHED_VECTOR};
use crate::sys::process::{Thread, Tid};
use crate::sys::{Error, Kernel};

pub const DEFAULT_TIMESLICE_US: u64 = 5_000;
pub const IDLE_POLL_US:         u64 = 20_000;
pub const RUN_QUEUE_SLOTS:      usize = 256;

// ---------------------------------------------------------------------------
// RunQueue
// ---------------------------------------------------------------------------

/// Slot menyimpan tid+1; 0 berarti kosong
pub struct RunQueue {
    slots: Box<[AtomicUsize]>,
}

impl RunQueue {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| AtomicUsize::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots }
    }

    /// First-fit: CAS tid ke slot kosong pertama
    fn insert(&self, tid: Tid) -> Result<usize, Error> {
        for (slot, cell) in self.slots.iter().enumerate() {
            if cell
                .compare_exchange(0, tid + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(slot);
            }
        }
        Err(Error::QueueFull)
    }

    /// Klaim isi satu slot; gagal bila slot sudah berubah
    fn take_at(&self, slot: usize, tid: Tid) -> bool {
        self.slots[slot]
            .compare_exchange(tid + 1, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn peek(&self, slot: usize) -> Option<Tid> {
        match self.slots[slot].load(Ordering::SeqCst) {
            0 => None,
            raw => Some(raw - 1),
        }
    }

    fn remove(&self, tid: Tid) -> bool {
        for slot in 0..self.slots.len() {
            if self.take_at(slot, tid) {
                return true;
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// CpuLocal
// ---------------------------------------------------------------------------

pub struct CpuLocal {
    pub id:    usize,
    /// Slot terakhir yang dilayani CPU ini; scan mulai tepat setelahnya
    last_slot: AtomicUsize,
    current:   Mutex<Option<Arc<Thread>>>,
}

impl CpuLocal {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            last_slot: AtomicUsize::new(RUN_QUEUE_SLOTS - 1),
            current:   Mutex::new(None),
        }
    }

    pub fn current_thread(&self) -> Option<Arc<Thread>> {
        self.current.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// Enqueue / dequeue
// ---------------------------------------------------------------------------

/// Masukkan thread ke run queue. Idempoten lewat flag queued; flag parked
/// dibersihkan — enqueue adalah cara satu-satunya thread blocked bangun.
pub fn try_enqueue(kernel: &Kernel, thread: &Arc<Thread>) -> Result<(), Error> {
    if thread.queued.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    thread.parked.store(false, Ordering::SeqCst);
    match kernel.run_queue().insert(thread.tid) {
        Ok(_) => Ok(()),
        Err(err) => {
            thread.queued.store(false, Ordering::SeqCst);
            Err(err)
        }
    }
}

/// Tandai thread parked dan keluarkan dari queue bila sedang antre.
/// Reschedule berikutnya tidak akan memasukkannya lagi.
pub fn park(kernel: &Kernel, thread: &Arc<Thread>) {
    thread.parked.store(true, Ordering::SeqCst);
    if thread.queued.swap(false, Ordering::SeqCst) {
        kernel.run_queue().remove(thread.tid);
    }
}

// ---------------------------------------------------------------------------
// Reschedule
// ---------------------------------------------------------------------------

/// Badan handler interrupt timer: simpan context thread yang terpotong,
/// pilih thread berikutnya, tulis ulang trap frame in-place.
///
/// Mengembalikan tid thread terpilih, atau `None` bila CPU idle (timer
/// di-arm ulang ke interval poll panjang).
pub fn reschedule(kernel: &Kernel, cpu: &CpuLocal, ctx: &mut CpuContext) -> Option<Tid> {
    // Simpan thread yang sedang jalan dan lepas run-lock-nya
    let prev = cpu.current.lock().take();
    if let Some(prev) = prev {
        *prev.ctx.lock() = *ctx;
        prev.fs_base
            .store(kernel.platform.read_fs_base(), Ordering::SeqCst);
        prev.gs_base
            .store(kernel.platform.read_gs_base(), Ordering::SeqCst);
        if !prev.parked.load(Ordering::SeqCst) {
            if let Err(err) = try_enqueue(kernel, &prev) {
                // Queue penuh: thread tidak boleh jatuh dari scheduling —
                // biarkan dia memegang CPU satu slice lagi dan coba ulang
                log::warn!("sched: queue full, tid {} keeps the cpu: {}", prev.tid, err);
                kernel.platform.arm_oneshot(SCHED_VECTOR, prev.timeslice_us);
                let tid = prev.tid;
                *cpu.current.lock() = Some(prev);
                return Some(tid);
            }
        }
        prev.running.store(false, Ordering::SeqCst);
    }

    // Scan melingkar mulai tepat setelah slot terakhir CPU ini
    let start = cpu.last_slot.load(Ordering::SeqCst) + 1;
    let mut picked: Option<Arc<Thread>> = None;
    for i in 0..RUN_QUEUE_SLOTS {
        let slot = (start + i) % RUN_QUEUE_SLOTS;
        let tid = match kernel.run_queue().peek(slot) {
            Some(tid) => tid,
            None => continue,
        };
        let thread = match kernel.thread(tid) {
            Some(thread) => thread,
            None => continue,
        };
        // run-lock: CPU lain sedang memegangnya → lewati slot ini
        if thread.running.swap(true, Ordering::SeqCst) {
            continue;
        }
        if kernel.run_queue().take_at(slot, tid) {
            thread.queued.store(false, Ordering::SeqCst);
            cpu.last_slot.store(slot, Ordering::SeqCst);
            picked = Some(thread);
            break;
        }
        thread.running.store(false, Ordering::SeqCst);
    }

    let thread = match picked {
        Some(thread) => thread,
        None => {
            kernel.platform.arm_oneshot(SCHED_VECTOR, IDLE_POLL_US);
            return None;
        }
    };

    kernel
        .platform
        .write_fs_base(thread.fs_base.load(Ordering::SeqCst));
    kernel
        .platform
        .write_gs_base(thread.gs_base.load(Ordering::SeqCst));
    kernel
        .platform
        .load_task_stacks(thread.kernel_stack_top, thread.fault_stack_top);

    let root = match &thread.process {
        Some(process) => process.pagemap.lock().top_level(),
        None => kernel.kernel_pagemap().top_level(),
    };
    if kernel.platform.active_pagemap() != root {
        kernel.platform.switch_pagemap(root);
    }

    kernel.platform.arm_oneshot(SCHED_VECTOR, thread.timeslice_us);
    *ctx = *thread.ctx.lock();
    let tid = thread.tid;
    *cpu.current.lock() = Some(thread);
    Some(tid)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::process::new_kernel_thread;
    use crate::sys::testutil::test_env;
    use x86_64::VirtAddr;

    #[test]
    fn round_robin_is_fair_over_three_threads() {
        let env = test_env(256);
        let kernel = &env.kernel;
        let a = new_kernel_thread(kernel, VirtAddr::new(0x1000), 0).unwrap();
        let b = new_kernel_thread(kernel, VirtAddr::new(0x1000), 1).unwrap();
        let c = new_kernel_thread(kernel, VirtAddr::new(0x1000), 2).unwrap();

        let cpu = kernel.cpu(0);
        let mut ctx = crate::sys::arch::CpuContext::zeroed();
        let schedule: Vec<Option<Tid>> =
            (0..6).map(|_| reschedule(kernel, cpu, &mut ctx)).collect();
        assert_eq!(
            schedule,
            [a.tid, b.tid, c.tid, a.tid, b.tid, c.tid].map(Some)
        );
    }

    #[test]
    fn parked_thread_is_skipped_until_requeued() {
        let env = test_env(256);
        let kernel = &env.kernel;
        let a = new_kernel_thread(kernel, VirtAddr::new(0x1000), 0).unwrap();
        let b = new_kernel_thread(kernel, VirtAddr::new(0x1000), 1).unwrap();

        let cpu = kernel.cpu(0);
        let mut ctx = crate::sys::arch::CpuContext::zeroed();
        assert_eq!(reschedule(kernel, cpu, &mut ctx), Some(a.tid));

        // A sekarang current; park sebelum preemption berikutnya
        park(kernel, &a);
        assert_eq!(reschedule(kernel, cpu, &mut ctx), Some(b.tid));
        assert_eq!(reschedule(kernel, cpu, &mut ctx), Some(b.tid));

        // A kembali antre; dalam satu sweep berikutnya dia pasti kebagian
        try_enqueue(kernel, &a).unwrap();
        let next = [
            reschedule(kernel, cpu, &mut ctx),
            reschedule(kernel, cpu, &mut ctx),
        ];
        assert!(next.contains(&Some(a.tid)));
    }

    #[test]
    fn idle_cpu_arms_the_long_poll() {
        let env = test_env(256);
        let kernel = &env.kernel;
        let cpu = kernel.cpu(0);
        let mut ctx = crate::sys::arch::CpuContext::zeroed();
        assert_eq!(reschedule(kernel, cpu, &mut ctx), None);
    }

    #[test]
    fn enqueue_is_idempotent() {
        let env = test_env(256);
        let kernel = &env.kernel;
        let a = new_kernel_thread(kernel, VirtAddr::new(0x1000), 0).unwrap();
        try_enqueue(kernel, &a).unwrap();
        try_enqueue(kernel, &a).unwrap();

        let cpu = kernel.cpu(0);
        let mut ctx = crate::sys::arch::CpuContext::zeroed();
        assert_eq!(reschedule(kernel, cpu, &mut ctx), Some(a.tid));
        park(kernel, &a);
        // tidak ada salinan kedua yang tertinggal di queue
        assert_eq!(reschedule(kernel, cpu, &mut ctx), None);
    }

    #[test]
    fn queue_full_preemption_keeps_the_thread_on_cpu() {
        let env = test_env(256);
        let kernel = &env.kernel;
        let a = new_kernel_thread(kernel, VirtAddr::new(0x1000), 0).unwrap();

        let cpu = kernel.cpu(0);
        let mut ctx = crate::sys::arch::CpuContext::zeroed();
        assert_eq!(reschedule(kernel, cpu, &mut ctx), Some(a.tid));

        // penuhi queue dengan tid palsu; A tidak akan kebagian slot lagi
        while kernel.run_queue().insert(9_999).is_ok() {}

        assert_eq!(reschedule(kernel, cpu, &mut ctx), Some(a.tid));
        assert!(a.running.load(Ordering::SeqCst));
        assert_eq!(cpu.current_thread().map(|t| t.tid), Some(a.tid));
    }

    #[test]
    fn reschedule_saves_and_restores_contexts() {
        let env = test_env(256);
        let kernel = &env.kernel;
        let a = new_kernel_thread(kernel, VirtAddr::new(0x1111), 7).unwrap();
        let b = new_kernel_thread(kernel, VirtAddr::new(0x2222), 8).unwrap();

        let cpu = kernel.cpu(0);
        let mut ctx = crate::sys::arch::CpuContext::zeroed();
        reschedule(kernel, cpu, &mut ctx);
        assert_eq!(ctx.rip, 0x1111);
        assert_eq!(ctx.rdi, 7);

        // "jalankan" A sedikit lalu preempt; state harus kembali utuh
        ctx.rip = 0x1234;
        ctx.rbx = 42;
        reschedule(kernel, cpu, &mut ctx);
        assert_eq!(ctx.rip, 0x2222);
        assert_eq!(ctx.rdi, 8);

        reschedule(kernel, cpu, &mut ctx);
        assert_eq!(ctx.rip, 0x1234);
        assert_eq!(ctx.rbx, 42);
        let _ = (a, b);
    }
}
