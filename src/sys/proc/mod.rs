//! proc — process & thread management
//!
//!   process — record Process/Thread, fork/exec/exit/waitpid, shim syscall
//!   sched   — run queue CAS + round-robin per-CPU dengan preemption timer

pub mod process;
pub mod sched;
