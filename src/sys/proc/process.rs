//! process — record Process/Thread & operasi lifecycle
//!
//! fork menduplikasi address space (eager untuk private anonymous), exec
//! mengganti image di pagemap BARU lalu menukar pointer-nya, exit melepas
//! semua resource dan menerbitkan status lewat Event, waitpid menunggu
//! event exit anak mana pun lalu me-reap-nya.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;
use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use crate::sys::arch::CpuContext;
use crate::sys::fs::{
    Auxval, FileDescription, OpenFlags, AT_ENTRY, AT_NULL, AT_PHDR, AT_PHENT, AT_PHNUM,
};
use crate::sys::ipc::{self, Event};
use crate::sys::mem::PAGE_SIZE;
use crate::sys::vmm::{self, MapFlags, Pagemap, Protection};
use crate::sys::{ipc::await_events, sched, Error, Kernel};

pub type Pid = usize;
pub type Tid = usize;

pub const WNOHANG: u32 = 1;

/// Sentinel "belum ada listener yang menembak" di `Thread::woken_index`
pub const WOKEN_NONE: usize = usize::MAX;

/// Bit tertinggi status: proses sudah exit; exit code di byte kedua
pub const STATUS_EXITED: u32 = 1 << 31;

pub fn make_exit_status(code: u8) -> u32 {
    STATUS_EXITED | ((code as u32) << 8)
}

pub fn exit_code(status: u32) -> u8 {
    (status >> 8) as u8
}

pub const KERNEL_STACK_SIZE: u64 = 2 * PAGE_SIZE;
pub const FAULT_STACK_SIZE:  u64 = 2 * PAGE_SIZE;
pub const THREAD_STACK_SIZE: u64 = 2 * PAGE_SIZE;

/// Puncak area stack user; tiap thread turun SIZE + satu guard page
pub const THREAD_STACK_TOP: u64 = 0x7000_0000_0000;

/// Bias muat interpreter dinamis (PT_INTERP)
const INTERP_BASE: u64 = 0x4000_0000;

// ---------------------------------------------------------------------------
// Process & Thread
// ---------------------------------------------------------------------------

pub struct Process {
    pub pid:     Pid,
    pub ppid:    AtomicUsize,
    pub pagemap: Mutex<Arc<Pagemap>>,
    pub threads: Mutex<Vec<Arc<Thread>>>,
    /// Tabel fd slot-indexed; slot kosong setelah close
    pub files:   Mutex<Vec<Option<Arc<FileDescription>>>>,
    pub cwd:     Mutex<String>,
    /// Cursor menurun untuk stack thread berikutnya
    pub thread_stack_top: AtomicU64,
    pub children: Mutex<Vec<Arc<Process>>>,
    pub status:   AtomicU32,
    /// Ditembak tepat sekali saat exit; yang ditunggu waitpid
    pub exit_event: Arc<Event>,
}

impl Process {
    pub fn file(&self, fd: usize) -> Option<Arc<FileDescription>> {
        self.files.lock().get(fd).and_then(|f| f.clone())
    }

    /// Masukkan description ke slot fd bebas pertama
    pub fn insert_file(&self, file: Arc<FileDescription>) -> usize {
        let mut files = self.files.lock();
        match files.iter().position(|slot| slot.is_none()) {
            Some(fd) => {
                files[fd] = Some(file);
                fd
            }
            None => {
                files.push(Some(file));
                files.len() - 1
            }
        }
    }

    pub fn has_exited(&self) -> bool {
        self.status.load(Ordering::SeqCst) & STATUS_EXITED != 0
    }
}

pub struct Thread {
    pub tid:     Tid,
    /// None untuk thread kernel murni
    pub process: Option<Arc<Process>>,

    /// Run-lock: CPU yang mengeksekusi (atau sedang men-switch) memegangnya
    pub running: AtomicBool,
    pub queued:  AtomicBool,
    /// Blocked/exiting: reschedule tidak boleh memasukkannya lagi
    pub parked:  AtomicBool,
    /// Index event yang membangunkan (WOKEN_NONE selama menunggu)
    pub woken_index: AtomicUsize,

    pub ctx: Mutex<CpuContext>,
    pub kernel_stack_top: VirtAddr,
    pub fault_stack_top:  VirtAddr,
    pub fs_base: AtomicU64,
    pub gs_base: AtomicU64,
    pub timeslice_us: u64,
}

/// Bagaimana thread baru mulai hidup
pub enum ThreadEntry<'a> {
    /// Fungsi kernel dengan satu argumen di rdi
    Kernel { entry: VirtAddr, arg: u64 },
    /// Entry point ELF user: argv/envp/auxv diserialisasikan ke stack baru
    User {
        entry: VirtAddr,
        argv:  &'a [&'a str],
        envp:  &'a [&'a str],
        aux:   Auxval,
    },
    /// Salinan context milik parent (fork); rax sudah diatur caller
    Forked { ctx: CpuContext },
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

/// Buat Process baru. Dengan `parent` (fork): pagemap di-fork, tabel fd
/// dibagikan per-description (Arc clone), cursor & cwd disalin, anak
/// didaftarkan ke parent. Tanpa parent: pakai `pagemap` yang diberikan,
/// atau buat address space kosong.
pub fn new_process(
    kernel: &Kernel,
    parent: Option<&Arc<Process>>,
    pagemap: Option<Arc<Pagemap>>,
) -> Result<Arc<Process>, Error> {
    let (pagemap, ppid, files, cwd, stack_top) = match parent {
        Some(parent) => (
            vmm::fork_pagemap(kernel, &parent.pagemap.lock().clone())?,
            parent.pid,
            parent.files.lock().clone(),
            parent.cwd.lock().clone(),
            parent.thread_stack_top.load(Ordering::SeqCst),
        ),
        None => {
            let pagemap = match pagemap {
                Some(pagemap) => pagemap,
                None => vmm::new_pagemap(kernel)?,
            };
            (pagemap, 0, Vec::new(), "/".to_string(), THREAD_STACK_TOP)
        }
    };

    let process = kernel.insert_process(|pid| {
        Arc::new(Process {
            pid,
            ppid: AtomicUsize::new(ppid),
            pagemap: Mutex::new(pagemap),
            threads: Mutex::new(Vec::new()),
            files: Mutex::new(files),
            cwd: Mutex::new(cwd),
            thread_stack_top: AtomicU64::new(stack_top),
            children: Mutex::new(Vec::new()),
            status: AtomicU32::new(0),
            exit_event: Event::new(),
        })
    });

    if let Some(parent) = parent {
        parent.children.lock().push(process.clone());
    }
    log::debug!("proc: new process pid {} (ppid {})", process.pid, ppid);
    Ok(process)
}

/// Alokasikan & petakan stack kernel-space; kembalikan alamat puncaknya
fn map_kernel_stack(kernel: &Kernel, size: u64) -> Result<VirtAddr, Error> {
    let frames = size / PAGE_SIZE;
    let phys = kernel.with_frames(|fa| fa.allocz(frames))?;
    let top = kernel.take_kernel_stack_slot(size);
    let base = top - size;
    for i in 0..frames {
        kernel.kernel_pagemap().map_page(
            kernel,
            VirtAddr::new(base + i * PAGE_SIZE),
            phys + i * PAGE_SIZE,
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
        )?;
    }
    Ok(VirtAddr::new(top))
}

/// Lepas stack yang dipetakan `map_kernel_stack`
fn unmap_kernel_stack(kernel: &Kernel, top: VirtAddr, size: u64) {
    let base = top.as_u64() - size;
    let phys = kernel
        .kernel_pagemap()
        .translate(kernel, VirtAddr::new(base));
    for i in 0..size / PAGE_SIZE {
        kernel
            .kernel_pagemap()
            .unmap_page(kernel, VirtAddr::new(base + i * PAGE_SIZE));
    }
    if let Some(phys) = phys {
        kernel.with_frames(|fa| fa.free(phys, size / PAGE_SIZE));
    }
}

/// Alokasikan stack user di cursor menurun proses, petakan ke `pagemap`,
/// dan serialisasikan argv/envp/auxv. Kembalikan rsp awal (16-byte aligned).
fn setup_user_stack(
    kernel: &Kernel,
    pagemap: &Arc<Pagemap>,
    process: &Process,
    argv: &[&str],
    envp: &[&str],
    aux: Auxval,
) -> Result<u64, Error> {
    let frames = THREAD_STACK_SIZE / PAGE_SIZE;
    let phys = kernel.with_frames(|fa| fa.allocz(frames))?;
    let top = process
        .thread_stack_top
        .fetch_sub(THREAD_STACK_SIZE + PAGE_SIZE, Ordering::SeqCst);
    let base = top - THREAD_STACK_SIZE;

    // Stack adalah region private-anonymous biasa: fork ikut
    // menduplikasinya dan teardown melepasnya lewat jalur region
    vmm::mmap_range(
        kernel,
        pagemap,
        base,
        phys.as_u64(),
        THREAD_STACK_SIZE,
        Protection::READ | Protection::WRITE,
        MapFlags::PRIVATE,
    )?;

    // Frame fisik kontigu: alamat virtual v di stack = phys + (v - base)
    let window = kernel.window();
    let phys_of = |v: u64| -> PhysAddr { phys + (v - base) };
    let mut sp = top;

    let mut env_ptrs = Vec::with_capacity(envp.len());
    for s in envp {
        sp -= s.len() as u64 + 1;
        window.write_bytes(phys_of(sp), s.as_bytes());
        window.write_bytes(phys_of(sp + s.len() as u64), &[0]);
        env_ptrs.push(sp);
    }
    let mut arg_ptrs = Vec::with_capacity(argv.len());
    for s in argv {
        sp -= s.len() as u64 + 1;
        window.write_bytes(phys_of(sp), s.as_bytes());
        window.write_bytes(phys_of(sp + s.len() as u64), &[0]);
        arg_ptrs.push(sp);
    }
    sp &= !0xf;

    // argc, argv..., 0, envp..., 0, auxv berpasangan, AT_NULL
    let mut qwords: Vec<u64> = Vec::new();
    qwords.push(argv.len() as u64);
    qwords.extend_from_slice(&arg_ptrs);
    qwords.push(0);
    qwords.extend_from_slice(&env_ptrs);
    qwords.push(0);
    for (key, value) in [
        (AT_ENTRY, aux.at_entry),
        (AT_PHDR, aux.at_phdr),
        (AT_PHENT, aux.at_phent),
        (AT_PHNUM, aux.at_phnum),
        (AT_NULL, 0),
    ] {
        qwords.push(key);
        qwords.push(value);
    }
    // rsp akhir harus tetap 16-byte aligned
    if qwords.len() % 2 == 1 {
        sp -= 8;
    }
    let rsp = sp - qwords.len() as u64 * 8;
    for (i, qword) in qwords.iter().enumerate() {
        window.write_u64(phys_of(rsp + i as u64 * 8), *qword);
    }
    Ok(rsp)
}

/// Buat thread baru, masukkan ke tabel & run queue.
pub fn new_thread(
    kernel: &Kernel,
    process: Option<&Arc<Process>>,
    entry: ThreadEntry,
) -> Result<Arc<Thread>, Error> {
    let kernel_stack_top = map_kernel_stack(kernel, KERNEL_STACK_SIZE)?;
    let fault_stack_top = map_kernel_stack(kernel, FAULT_STACK_SIZE)?;

    let ctx = match entry {
        ThreadEntry::Kernel { entry, arg } => {
            CpuContext::new_kernel(entry, kernel_stack_top, arg)
        }
        ThreadEntry::User {
            entry,
            argv,
            envp,
            aux,
        } => {
            let process = process.ok_or(Error::InvalidArgument)?;
            let pagemap = process.pagemap.lock().clone();
            let rsp = setup_user_stack(kernel, &pagemap, process, argv, envp, aux)?;
            CpuContext::new_user(entry, VirtAddr::new(rsp))
        }
        ThreadEntry::Forked { ctx } => ctx,
    };

    let thread = kernel.insert_thread(|tid| {
        Arc::new(Thread {
            tid,
            process: process.cloned(),
            running: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            parked: AtomicBool::new(false),
            woken_index: AtomicUsize::new(WOKEN_NONE),
            ctx: Mutex::new(ctx),
            kernel_stack_top,
            fault_stack_top,
            fs_base: AtomicU64::new(0),
            gs_base: AtomicU64::new(0),
            timeslice_us: sched::DEFAULT_TIMESLICE_US,
        })
    });

    if let Some(process) = process {
        process.threads.lock().push(thread.clone());
    }
    sched::try_enqueue(kernel, &thread)?;
    Ok(thread)
}

/// Thread kernel polos: `entry(arg)` di ring 0
pub fn new_kernel_thread(kernel: &Kernel, entry: VirtAddr, arg: u64) -> Result<Arc<Thread>, Error> {
    new_thread(kernel, None, ThreadEntry::Kernel { entry, arg })
}

// ---------------------------------------------------------------------------
// fork / exec / exit / waitpid
// ---------------------------------------------------------------------------

/// Duplikasi proses pemanggil. `ctx` adalah trap frame pemanggil; anak
/// mendapat salinannya dengan rax dipaksa 0 ("saya anak"). Mengembalikan
/// pid anak ke parent.
pub fn fork(kernel: &Kernel, thread: &Arc<Thread>, ctx: &CpuContext) -> Result<Pid, Error> {
    let process = thread.process.as_ref().ok_or(Error::InvalidArgument)?;
    let child = new_process(kernel, Some(process), None)?;

    let mut child_ctx = *ctx;
    child_ctx.rax = 0;
    let child_thread = new_thread(kernel, Some(&child), ThreadEntry::Forked { ctx: child_ctx })?;
    child_thread
        .fs_base
        .store(thread.fs_base.load(Ordering::SeqCst), Ordering::SeqCst);
    child_thread
        .gs_base
        .store(thread.gs_base.load(Ordering::SeqCst), Ordering::SeqCst);

    log::debug!("proc: pid {} forked pid {}", process.pid, child.pid);
    Ok(child.pid)
}

/// Ganti image proses pemanggil. Berhasil ⇒ `ctx` sudah ditulis ulang ke
/// entry point baru dan eksekusi tidak kembali ke image lama. Gagal
/// SEBELUM titik tukar pagemap ⇒ image lama utuh dan error dikembalikan;
/// gagal SETELAHNYA ⇒ proses mati (tidak ada rollback).
pub fn exec(
    kernel: &Kernel,
    thread: &Arc<Thread>,
    ctx: &mut CpuContext,
    path: &str,
    argv: &[&str],
    envp: &[&str],
) -> Result<(), Error> {
    let process = thread.process.as_ref().ok_or(Error::InvalidArgument)?;

    let resource = kernel.vfs.open(path, OpenFlags::READ, 0)?;
    let pagemap = vmm::new_pagemap(kernel)?;
    let saved_stack_top = process.thread_stack_top.load(Ordering::SeqCst);

    let prepared = (|| {
        let image = kernel.loader.load(kernel, &pagemap, &resource, 0)?;
        let entry = match &image.interpreter {
            Some(interp_path) => {
                let interp = kernel.vfs.open(interp_path, OpenFlags::READ, 0)?;
                kernel
                    .loader
                    .load(kernel, &pagemap, &interp, INTERP_BASE)?
                    .entry
            }
            None => image.entry,
        };

        // Stack segar untuk image baru; cursor stack mulai dari atas lagi
        process
            .thread_stack_top
            .store(THREAD_STACK_TOP, Ordering::SeqCst);
        let rsp = setup_user_stack(kernel, &pagemap, process, argv, envp, image.aux)?;
        Ok::<_, Error>((entry, rsp))
    })();

    let (entry, rsp) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            // Image lama masih utuh: kembalikan cursor stack dan buang
            // pagemap setengah jadi beserta frame-framenya
            process
                .thread_stack_top
                .store(saved_stack_top, Ordering::SeqCst);
            if let Err(erase_err) = vmm::erase_pagemap(kernel, &pagemap) {
                log::warn!("proc: discarding exec pagemap failed: {}", erase_err);
            }
            return Err(err);
        }
    };

    // Titik tukar: mulai dari sini kegagalan berarti proses mati
    let old = core::mem::replace(&mut *process.pagemap.lock(), pagemap.clone());
    if kernel.platform.active_pagemap() == old.top_level() {
        kernel.platform.switch_pagemap(pagemap.top_level());
    }
    vmm::erase_pagemap(kernel, &old)?;

    thread.fs_base.store(0, Ordering::SeqCst);
    thread.gs_base.store(0, Ordering::SeqCst);
    *ctx = CpuContext::new_user(entry, VirtAddr::new(rsp));
    log::debug!("proc: pid {} exec {}", process.pid, path);
    Ok(())
}

/// Akhiri proses pemanggil: tutup semua fd, oper anak ke init, bongkar
/// address space, terbitkan status, dan pensiunkan thread-nya dari
/// scheduling. Setelah ini trap glue tidak boleh kembali ke user —
/// `sys_exit` yang mengurus loop itu.
pub fn exit_process(
    kernel: &Kernel,
    process: &Arc<Process>,
    thread: &Arc<Thread>,
    code: u8,
) -> Result<(), Error> {
    // Lepaskan diri dari pagemap yang akan dibongkar
    let old = process.pagemap.lock().clone();
    if kernel.platform.active_pagemap() == old.top_level() {
        kernel
            .platform
            .switch_pagemap(kernel.kernel_pagemap().top_level());
    }

    for file in process.files.lock().drain(..).flatten() {
        if let Err(err) = file.resource.close() {
            log::warn!("proc: close on exit failed: {}", err);
        }
    }

    // Anak yatim pindah ke init
    if let Some(init) = kernel.init_process() {
        if !Arc::ptr_eq(&init, process) {
            for child in process.children.lock().drain(..) {
                child.ppid.store(init.pid, Ordering::SeqCst);
                init.children.lock().push(child);
            }
        }
    }

    vmm::erase_pagemap(kernel, &old)?;

    process
        .status
        .store(make_exit_status(code), Ordering::SeqCst);
    ipc::trigger(kernel, &process.exit_event);

    // Pensiunkan thread: tidak pernah antre lagi dan hilang dari tabel.
    // Stack kernel-nya sengaja TIDAK dilepas di sini — jalur syscall ini
    // masih berdiri di atasnya sampai CPU pindah context. Thread tetap di
    // daftar proses; reap di waitpid yang melepas stack-nya.
    sched::park(kernel, thread);
    kernel.remove_thread(thread.tid);

    log::debug!("proc: pid {} exited with code {}", process.pid, code);
    Ok(())
}

/// Tunggu anak exit. `pid == -1` berarti anak mana pun; `pid >= 0` anak
/// tertentu. `WNOHANG` mem-poll sekali. Anak yang di-reap dicabut dari
/// daftar children dan tabel proses.
pub fn waitpid(
    kernel: &Kernel,
    thread: &Arc<Thread>,
    pid: isize,
    options: u32,
) -> Result<Option<(Pid, u32)>, Error> {
    let process = thread.process.as_ref().ok_or(Error::InvalidArgument)?;

    let targets: Vec<Arc<Process>> = process
        .children
        .lock()
        .iter()
        .filter(|c| pid < 0 || c.pid == pid as Pid)
        .cloned()
        .collect();
    if targets.is_empty() {
        return Err(Error::NoChildren);
    }

    let events: Vec<Arc<Event>> = targets.iter().map(|c| c.exit_event.clone()).collect();
    let which = await_events(kernel, thread, &events, options & WNOHANG != 0)?;
    let reaped = match which {
        Some(index) => &targets[index],
        None => return Ok(None),
    };

    let status = reaped.status.load(Ordering::SeqCst);
    release_thread_stacks(kernel, reaped);
    process
        .children
        .lock()
        .retain(|c| !Arc::ptr_eq(c, reaped));
    kernel.remove_process(reaped.pid);
    Ok(Some((reaped.pid, status)))
}

/// Lepas stack kernel & fault-stack semua thread proses yang sudah exit.
/// Baru aman setelah tidak ada CPU yang memegang run-lock thread-nya —
/// thread yang exit mungkin masih berdiri di stack itu sampai preemption
/// berikutnya memindahkan CPU-nya.
fn release_thread_stacks(kernel: &Kernel, process: &Arc<Process>) {
    let threads: Vec<Arc<Thread>> = process.threads.lock().drain(..).collect();
    for thread in threads {
        while thread.running.load(Ordering::SeqCst) {
            kernel.platform.yield_now();
        }
        unmap_kernel_stack(kernel, thread.kernel_stack_top, KERNEL_STACK_SIZE);
        unmap_kernel_stack(kernel, thread.fault_stack_top, FAULT_STACK_SIZE);
    }
}

// ---------------------------------------------------------------------------
// Syscall shims
// ---------------------------------------------------------------------------

/// Thread yang sedang jalan di CPU pemanggil — dasar semua shim
pub fn current_thread(kernel: &Kernel, cpu_id: usize) -> Option<Arc<Thread>> {
    kernel.cpu(cpu_id).current_thread()
}

pub fn sys_fork(kernel: &Kernel, cpu_id: usize, ctx: &CpuContext) -> Result<Pid, Error> {
    let thread = current_thread(kernel, cpu_id).ok_or(Error::NotFound)?;
    fork(kernel, &thread, ctx)
}

pub fn sys_exec(
    kernel: &Kernel,
    cpu_id: usize,
    ctx: &mut CpuContext,
    path: &str,
    argv: &[&str],
    envp: &[&str],
) -> Result<(), Error> {
    let thread = current_thread(kernel, cpu_id).ok_or(Error::NotFound)?;
    exec(kernel, &thread, ctx, path, argv, envp)
}

pub fn sys_exit(kernel: &Kernel, cpu_id: usize, code: u8) -> ! {
    if let Some(thread) = current_thread(kernel, cpu_id) {
        if let Some(process) = thread.process.clone() {
            if let Err(err) = exit_process(kernel, &process, &thread, code) {
                log::error!("proc: exit failed: {}", err);
            }
        }
    }
    // CPU ini tinggal menunggu preemption memilih thread lain
    loop {
        kernel.platform.yield_now();
    }
}

pub fn sys_waitpid(
    kernel: &Kernel,
    cpu_id: usize,
    pid: isize,
    options: u32,
) -> Result<Option<(Pid, u32)>, Error> {
    let thread = current_thread(kernel, cpu_id).ok_or(Error::NotFound)?;
    waitpid(kernel, &thread, pid, options)
}

pub fn sys_mmap(
    kernel: &Kernel,
    cpu_id: usize,
    addr: u64,
    length: u64,
    prot: u64,
    flags: u64,
    fd: usize,
    offset: u64,
) -> Result<u64, Error> {
    let thread = current_thread(kernel, cpu_id).ok_or(Error::NotFound)?;
    let process = thread.process.as_ref().ok_or(Error::InvalidArgument)?;
    let flags = MapFlags::from_bits_truncate(flags);
    let resource = if flags.contains(MapFlags::ANONYMOUS) {
        None
    } else {
        Some(process.file(fd).ok_or(Error::NotFound)?.resource.clone())
    };
    let pagemap = process.pagemap.lock().clone();
    let base = vmm::mmap(
        kernel,
        &pagemap,
        addr,
        length,
        Protection::from_bits_truncate(prot),
        flags,
        resource,
        offset,
    )?;
    Ok(base.as_u64())
}

pub fn sys_munmap(kernel: &Kernel, cpu_id: usize, addr: u64, length: u64) -> Result<(), Error> {
    let thread = current_thread(kernel, cpu_id).ok_or(Error::NotFound)?;
    let process = thread.process.as_ref().ok_or(Error::InvalidArgument)?;
    let pagemap = process.pagemap.lock().clone();
    vmm::munmap(kernel, &pagemap, addr, length)
}

pub fn sys_getpid(kernel: &Kernel, cpu_id: usize) -> Result<Pid, Error> {
    let thread = current_thread(kernel, cpu_id).ok_or(Error::NotFound)?;
    Ok(thread.process.as_ref().ok_or(Error::InvalidArgument)?.pid)
}

pub fn sys_getppid(kernel: &Kernel, cpu_id: usize) -> Result<Pid, Error> {
    let thread = current_thread(kernel, cpu_id).ok_or(Error::NotFound)?;
    Ok(thread
        .process
        .as_ref()
        .ok_or(Error::InvalidArgument)?
        .ppid
        .load(Ordering::SeqCst))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
