//! fs — collaborator traits ke dunia luar
//!
//! Filesystem, path resolution dan ELF loader bukan milik core ini;
//! mereka masuk lewat trait object `Vfs`, `Resource` dan `ProgramLoader`.

use alloc::string::String;
use alloc::sync::Arc;
use x86_64::VirtAddr;

use crate::sys::vmm::{LocalRegion, Pagemap};
use crate::sys::{Error, Kernel};

bitflags::bitflags! {
    /// Mode open yang diteruskan apa adanya ke VFS
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        const CREATE = 1 << 2;
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// Sebuah objek yang bisa dibuka: file, device, pipe. Refcount lewat `Arc`.
pub trait Resource: Send + Sync {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize, Error>;
    fn write(&self, buf: &[u8], offset: u64) -> Result<usize, Error>;

    fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Isi satu page untuk mapping file-backed yang baru fault.
    ///
    /// `memory_page` adalah nomor page virtual yang fault, `file_page`
    /// nomor page di dalam resource. Return `true` bila seluruh region
    /// sekarang resident dan boleh dipensiunkan dari fault handling.
    fn populate_page(
        &self,
        kernel: &Kernel,
        region: &Arc<LocalRegion>,
        memory_page: u64,
        file_page: u64,
    ) -> Result<bool, Error>;

    /// Dipanggil saat fork menduplikasi mapping private file-backed
    /// ke address space anak
    fn attach_mapping(&self, _kernel: &Kernel, _region: &Arc<LocalRegion>) -> Result<(), Error> {
        Ok(())
    }

    /// Dipanggil saat Local Region terakhir sebuah mapping file-backed
    /// dilepas lewat munmap atau teardown
    fn release_mapping(&self, _kernel: &Kernel, _region: &Arc<LocalRegion>) -> Result<(), Error> {
        Ok(())
    }
}

/// Satu slot tabel fd. Fork membagikan description yang sama (Arc clone),
/// bukan menduplikasi resource di bawahnya.
pub struct FileDescription {
    pub resource: Arc<dyn Resource>,
    pub flags:    OpenFlags,
}

// ---------------------------------------------------------------------------
// Vfs & ProgramLoader
// ---------------------------------------------------------------------------

pub trait Vfs: Send + Sync {
    fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<Arc<dyn Resource>, Error>;
}

pub const AT_NULL:  u64 = 0;
pub const AT_PHDR:  u64 = 3;
pub const AT_PHENT: u64 = 4;
pub const AT_PHNUM: u64 = 5;
pub const AT_ENTRY: u64 = 9;

/// Auxiliary vector yang diserialisasikan ke stack program baru
#[derive(Debug, Clone, Copy, Default)]
pub struct Auxval {
    pub at_entry: u64,
    pub at_phdr:  u64,
    pub at_phent: u64,
    pub at_phnum: u64,
}

pub struct LoadedImage {
    pub entry:       VirtAddr,
    pub aux:         Auxval,
    /// Path interpreter (PT_INTERP) bila image memintanya
    pub interpreter: Option<String>,
}

pub trait ProgramLoader: Send + Sync {
    /// Muat image ke `pagemap` dengan bias alamat `load_bias`
    fn load(
        &self,
        kernel: &Kernel,
        pagemap: &Arc<Pagemap>,
        resource: &Arc<dyn Resource>,
        load_bias: u64,
    ) -> Result<LoadedImage, Error>;
}
