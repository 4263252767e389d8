use crate::code::CodePage;
use crate::trap;
use lazy_static::lazy_static;
use log::{debug, info};
use memmap2::{MmapMut, MmapOptions};
use pagestep_core::util::PAGE_SIZE;
use pagestep_core::{
    AddressSpace, FaultHandler, FaultSource, OracleError, PageAddr, Protection,
    ProtectionControl, VictimError,
};
use std::cell::RefCell;
use std::io;
use thiserror::Error;

lazy_static! {
    /// Page size reported by the kernel.
    pub static ref SYSTEM_PAGE_SIZE: usize = {
        // SAFETY: sysconf has no preconditions
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size).unwrap_or(0)
    };
}

/// Errors specific to the native backend.
#[derive(Debug, Error)]
pub enum NativeError {
    /// The kernel uses a page size other than 4 KiB.
    #[error("Unsupported system page size {0}, expected {PAGE_SIZE}")]
    UnsupportedPageSize(usize),
    /// Assembling a code page failed.
    #[error(transparent)]
    Assembler(#[from] iced_x86::IcedError),
    /// A system call failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<NativeError> for VictimError {
    fn from(value: NativeError) -> Self {
        match value {
            NativeError::Io(e) => VictimError::IoError(e),
            other => VictimError::IoError(io::Error::other(other)),
        }
    }
}

struct DataRegion {
    _map: MmapMut,
    ptr: *mut u8,
    len: usize,
}

impl DataRegion {
    fn offset_of(&self, addr: usize) -> Option<usize> {
        let base = self.ptr as usize;
        (base..base + self.len).contains(&addr).then(|| addr - base)
    }
}

/// The calling process as victim address space.
///
/// Mappings live as long as the platform. All accesses made through
/// [`AddressSpace`] are real loads, stores and calls, checked by the MMU.
pub struct NativePlatform {
    code: RefCell<Vec<CodePage>>,
    data: RefCell<Vec<DataRegion>>,
}

impl NativePlatform {
    /// Creates the platform after checking the system page size.
    ///
    /// # Errors
    ///
    /// [`NativeError::UnsupportedPageSize`] unless pages are 4 KiB.
    pub fn new() -> Result<Self, NativeError> {
        if *SYSTEM_PAGE_SIZE != PAGE_SIZE {
            return Err(NativeError::UnsupportedPageSize(*SYSTEM_PAGE_SIZE));
        }
        Ok(Self {
            code: RefCell::new(Vec::new()),
            data: RefCell::new(Vec::new()),
        })
    }

    fn data_ptr(&self, addr: usize) -> Result<*mut u8, VictimError> {
        self.data
            .borrow()
            .iter()
            .find_map(|region| region.offset_of(addr).map(|off| region.ptr.wrapping_add(off)))
            .ok_or_else(|| VictimError::InvalidInput(format!("0x{:x} is not victim data", addr)))
    }
}

fn prot_bits(protection: Protection) -> libc::c_int {
    let mut bits = libc::PROT_NONE;
    if protection.contains(Protection::READ) {
        bits |= libc::PROT_READ;
    }
    if protection.contains(Protection::WRITE) {
        bits |= libc::PROT_WRITE;
    }
    if protection.contains(Protection::EXEC) {
        bits |= libc::PROT_EXEC;
    }
    bits
}

impl ProtectionControl for NativePlatform {
    fn set_protection(&self, page: PageAddr, len: usize, protection: Protection) -> io::Result<()> {
        // SAFETY: mprotect validates the range; changing protections of our
        // own mappings cannot invalidate Rust references since victim memory
        // is only accessed through raw pointers
        let ret = unsafe {
            libc::mprotect(
                page.as_usize() as *mut libc::c_void,
                len,
                prot_bits(protection),
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl FaultSource for NativePlatform {
    fn deliver_to<R>(
        &self,
        handler: &mut dyn FaultHandler,
        run: impl FnOnce() -> R,
    ) -> Result<R, OracleError> {
        trap::deliver(handler, run)
    }
}

impl AddressSpace for NativePlatform {
    fn map_code(&self) -> Result<PageAddr, VictimError> {
        let page = CodePage::new()?;
        let base = page.base();
        self.code.borrow_mut().push(page);
        info!("Mapped code page at {}", base);
        Ok(base)
    }

    fn map_data(&self, pages: usize) -> Result<PageAddr, VictimError> {
        if pages == 0 {
            return Err(VictimError::InvalidInput("cannot map zero pages".to_string()));
        }
        let len = pages * PAGE_SIZE;
        let mut map = MmapOptions::new().len(len).map_anon()?;
        let ptr = map.as_mut_ptr();
        let base = PageAddr::containing(ptr as usize);
        self.data.borrow_mut().push(DataRegion {
            _map: map,
            ptr,
            len,
        });
        debug!("Mapped {} data pages at {}", pages, base);
        Ok(base)
    }

    fn fetch(&self, page: PageAddr) -> Result<(), VictimError> {
        let entry = self
            .code
            .borrow()
            .iter()
            .find(|code| code.base() == page)
            .map(CodePage::entry)
            .ok_or_else(|| VictimError::InvalidInput(format!("{} is not victim code", page)))?;
        entry();
        Ok(())
    }

    fn load(&self, addr: usize) -> Result<u8, VictimError> {
        let ptr = self.data_ptr(addr)?;
        // SAFETY: `ptr` lies inside a live mapping owned by this platform
        Ok(unsafe { std::ptr::read_volatile(ptr) })
    }

    fn store(&self, addr: usize, value: u8) -> Result<(), VictimError> {
        let ptr = self.data_ptr(addr)?;
        // SAFETY: `ptr` lies inside a live mapping owned by this platform
        unsafe { std::ptr::write_volatile(ptr, value) };
        Ok(())
    }
}
