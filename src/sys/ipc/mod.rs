//! ipc — event primitive (multi-waiter wait/notify)
//!
//! Satu mekanisme di balik notifikasi exit proses, fan-out interrupt
//! hardware dan operasi resource yang blocking. Event menyimpan counter
//! pending plus daftar listener terbatas di balik satu lock; lock diambil
//! dengan interrupt mati supaya CPU tidak deadlock melawan handler
//! preemption-nya sendiri.
//!
//! `trigger` tanpa listener menaikkan pending — trigger boleh mendahului
//! waiter dan `await_events` berikutnya langsung mengonsumsinya.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use spin::Mutex;

use crate::sys::process::{Thread, WOKEN_NONE};
use crate::sys::sched;
use crate::sys::{Error, Kernel};

pub const MAX_LISTENERS: usize = 32;

struct Listener {
    thread: Arc<Thread>,
    /// Index event ini di dalam set yang ditunggu thread-nya
    index:  usize,
}

struct EventInner {
    pending:   u64,
    listeners: Vec<Listener>,
}

pub struct Event {
    inner: Mutex<EventInner>,
}

impl Event {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(EventInner {
                pending:   0,
                listeners: Vec::new(),
            }),
        })
    }
}

fn detach(thread: &Thread, events: &[Arc<Event>]) {
    for event in events {
        event
            .inner
            .lock()
            .listeners
            .retain(|l| l.thread.tid != thread.tid);
    }
}

/// Tunggu salah satu dari `events`. Bila ada yang sudah pending, satu
/// dikonsumsi dan index-nya dikembalikan. Bila tidak dan `no_block`,
/// kembalikan `None`. Selain itu: pasang listener ke setiap event,
/// keluarkan thread dari run queue, dan serahkan CPU sampai salah satu
/// listener ditembak.
pub fn await_events(
    kernel: &Kernel,
    thread: &Arc<Thread>,
    events: &[Arc<Event>],
    no_block: bool,
) -> Result<Option<usize>, Error> {
    let ints = kernel.platform.disable_interrupts();

    // Pass cepat: sesuatu sudah pending?
    for (index, event) in events.iter().enumerate() {
        let mut inner = event.inner.lock();
        if inner.pending > 0 {
            inner.pending -= 1;
            drop(inner);
            kernel.platform.restore_interrupts(ints);
            return Ok(Some(index));
        }
    }
    if no_block {
        kernel.platform.restore_interrupts(ints);
        return Ok(None);
    }

    thread.woken_index.store(WOKEN_NONE, Ordering::SeqCst);

    // Pasang listener; re-check pending di bawah lock yang sama dengan
    // trigger supaya tidak ada wakeup yang hilang di antara dua pass
    for (index, event) in events.iter().enumerate() {
        let mut inner = event.inner.lock();
        if inner.pending > 0 {
            inner.pending -= 1;
            drop(inner);
            detach(thread, &events[..index]);
            kernel.platform.restore_interrupts(ints);
            return Ok(Some(index));
        }
        if inner.listeners.len() >= MAX_LISTENERS {
            drop(inner);
            detach(thread, &events[..index]);
            kernel.platform.restore_interrupts(ints);
            return Err(Error::TooManyListeners);
        }
        inner.listeners.push(Listener {
            thread: thread.clone(),
            index,
        });
    }

    sched::park(kernel, thread);
    kernel.platform.restore_interrupts(ints);

    while thread.woken_index.load(Ordering::SeqCst) == WOKEN_NONE {
        kernel.platform.yield_now();
    }

    // Listener di event lain masih terpasang; cabut semua milik kita.
    // parked dibersihkan: thread ini nyatanya sedang jalan.
    detach(thread, events);
    thread.parked.store(false, Ordering::SeqCst);
    Ok(Some(thread.woken_index.load(Ordering::SeqCst)))
}

/// Tembak satu event: tanpa listener pending naik satu; dengan listener,
/// SEMUA listener dibangunkan — masing-masing dicatat index set-nya dan
/// thread-nya dimasukkan lagi ke run queue.
pub fn trigger(kernel: &Kernel, event: &Event) {
    let ints = kernel.platform.disable_interrupts();
    let mut inner = event.inner.lock();
    if inner.listeners.is_empty() {
        inner.pending += 1;
    } else {
        for listener in inner.listeners.drain(..) {
            listener
                .thread
                .woken_index
                .store(listener.index, Ordering::SeqCst);
            if let Err(err) = sched::try_enqueue(kernel, &listener.thread) {
                log::warn!(
                    "ipc: cannot wake tid {}: {}",
                    listener.thread.tid,
                    err
                );
            }
        }
    }
    drop(inner);
    kernel.platform.restore_interrupts(ints);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
