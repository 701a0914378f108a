//! Inti — scheduling & virtual-memory core untuk kernel monolitik x86_64
//!
//! Crate ini memuat bagian inti kernel:
//!   - pmm:   bitmap physical frame allocator
//!   - vmm:   pagemap (radix page table) + global/local memory regions
//!   - proc:  process/thread records, fork/exec/exit/waitpid
//!   - sched: per-CPU round-robin run queue dengan preemption timer
//!   - ipc:   event primitive (multi-waiter wait/notify)
//!
//! Semua akses hardware (timer, CR3, TLB, segment bases, interrupt gate)
//! lewat trait `Platform` — IDT, GDT/TSS, APIC dan boot protocol adalah
//! collaborator di luar crate ini. Filesystem, ELF loader dan syscall
//! marshaling juga eksternal, dikonsumsi via trait `Vfs`, `ProgramLoader`
//! dan `Resource`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod sys;

pub use sys::{init, kernel, BootConfig, Error, Kernel};
