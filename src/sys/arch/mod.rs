//! arch — CPU context & platform abstraction (x86_64)
//!
//! `CpuContext` adalah register block yang disimpan trap-entry thunk dan
//! ditulis ulang in-place oleh scheduler. `Platform` menutup semua akses
//! hardware (timer, CR3, TLB, FS/GS, TSS, interrupt gate) — implementasi
//! konkret hidup di embedder bersama IDT/APIC-nya.

use x86_64::{PhysAddr, VirtAddr};

// ---------------------------------------------------------------------------
// Selectors & flags
// ---------------------------------------------------------------------------

pub const KERNEL_CS: u64 = 0x08;
pub const KERNEL_SS: u64 = 0x10;
pub const USER_CS:   u64 = 0x23;
pub const USER_SS:   u64 = 0x1b;

/// IF=1, reserved bit 1 selalu set
pub const RFLAGS_DEFAULT: u64 = 0x202;

/// Vector yang dipakai one-shot timer scheduler
pub const SCHED_VECTOR: u8 = 0x30;

// ---------------------------------------------------------------------------
// CpuContext
// ---------------------------------------------------------------------------

/// Saved register state satu thread. Layout mengikuti urutan push
/// trap-entry thunk: GPR lengkap lalu frame interrupt hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct CpuContext {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8:  u64,
    pub r9:  u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,

    // frame hardware
    pub rip:    u64,
    pub cs:     u64,
    pub rflags: u64,
    pub rsp:    u64,
    pub ss:     u64,
}

impl CpuContext {
    pub const fn zeroed() -> Self {
        Self {
            rax: 0, rbx: 0, rcx: 0, rdx: 0, rsi: 0, rdi: 0, rbp: 0,
            r8: 0, r9: 0, r10: 0, r11: 0, r12: 0, r13: 0, r14: 0, r15: 0,
            rip: 0, cs: 0, rflags: 0, rsp: 0, ss: 0,
        }
    }

    /// Context awal thread kernel: ring 0, satu argumen di rdi
    pub fn new_kernel(entry: VirtAddr, stack_top: VirtAddr, arg: u64) -> Self {
        let mut ctx = Self::zeroed();
        ctx.rip    = entry.as_u64();
        ctx.rsp    = stack_top.as_u64();
        ctx.rdi    = arg;
        ctx.cs     = KERNEL_CS;
        ctx.ss     = KERNEL_SS;
        ctx.rflags = RFLAGS_DEFAULT;
        ctx
    }

    /// Context awal thread user: ring 3
    pub fn new_user(entry: VirtAddr, stack_top: VirtAddr) -> Self {
        let mut ctx = Self::zeroed();
        ctx.rip    = entry.as_u64();
        ctx.rsp    = stack_top.as_u64();
        ctx.cs     = USER_CS;
        ctx.ss     = USER_SS;
        ctx.rflags = RFLAGS_DEFAULT;
        ctx
    }

    pub fn is_user(&self) -> bool {
        self.cs & 0x3 == 0x3
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Semua side effect hardware yang dibutuhkan core. Trap-entry, IDT, GDT/TSS
/// dan APIC milik embedder; core hanya memanggil lewat trait ini.
pub trait Platform: Send + Sync {
    /// Arm timer one-shot lokal; interrupt datang di `vector` setelah `us` µs
    fn arm_oneshot(&self, vector: u8, us: u64);

    /// End-of-interrupt ke interrupt controller lokal
    fn end_of_interrupt(&self);

    /// Tulis root pagemap aktif (CR3)
    fn switch_pagemap(&self, top_level: PhysAddr);

    /// Baca root pagemap aktif CPU pemanggil
    fn active_pagemap(&self) -> PhysAddr;

    /// Invalidate satu entry TLB di CPU pemanggil
    fn invalidate_page(&self, virt: VirtAddr);

    fn read_fs_base(&self) -> u64;
    fn write_fs_base(&self, base: u64);
    fn read_gs_base(&self) -> u64;
    fn write_gs_base(&self, base: u64);

    /// Pasang stack kernel & fault-stack thread terpilih ke task state CPU
    fn load_task_stacks(&self, kernel_stack_top: VirtAddr, fault_stack_top: VirtAddr);

    /// Matikan interrupt lokal; kembalikan apakah sebelumnya aktif
    fn disable_interrupts(&self) -> bool;

    /// Pulihkan state interrupt hasil `disable_interrupts`
    fn restore_interrupts(&self, was_enabled: bool);

    /// Serahkan CPU sampai preemption berikutnya (hlt / pause loop)
    fn yield_now(&self);
}
