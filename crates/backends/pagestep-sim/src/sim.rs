use log::{debug, warn};
use pagestep_core::util::PAGE_SIZE;
use pagestep_core::{
    Access, AddressSpace, FaultHandler, FaultSource, OracleError, PageAddr, Protection,
    ProtectionControl, VictimError,
};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

/// An access that keeps faulting after this many handler calls is abandoned.
pub const MAX_REFAULTS: usize = 16;

/// First simulated address handed out.
const SIM_BASE: usize = 0x1000_0000;

/// `ret` on x86_64; the content of every simulated code page.
const RET: u8 = 0xc3;

struct SimPage {
    bytes: Box<[u8]>,
    protection: Protection,
}

type ErasedHandler = *mut (dyn FaultHandler + 'static);

/// Software page table with synchronous fault delivery.
///
/// Mappings are separated by one unmapped guard page. The platform is
/// single-threaded; it is neither `Send` nor `Sync`.
pub struct SimPlatform {
    pages: RefCell<BTreeMap<PageAddr, SimPage>>,
    next: Cell<usize>,
    handler: Cell<Option<ErasedHandler>>,
    fatal: RefCell<Option<OracleError>>,
    faults: Cell<usize>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPlatform {
    /// Creates an empty address space.
    pub fn new() -> Self {
        Self {
            pages: RefCell::new(BTreeMap::new()),
            next: Cell::new(SIM_BASE),
            handler: Cell::new(None),
            fatal: RefCell::new(None),
            faults: Cell::new(0),
        }
    }

    /// Current protection of the page containing `addr`, if mapped.
    pub fn protection(&self, addr: usize) -> Option<Protection> {
        self.pages
            .borrow()
            .get(&PageAddr::containing(addr))
            .map(|page| page.protection)
    }

    /// Total number of faults raised since creation.
    pub fn faults_raised(&self) -> usize {
        self.faults.get()
    }

    fn map(&self, pages: usize, fill: impl Fn(usize) -> u8, protection: Protection) -> PageAddr {
        let base = self.next.get();
        // one guard page after every mapping
        self.next.set(base + (pages + 1) * PAGE_SIZE);
        let mut table = self.pages.borrow_mut();
        for i in 0..pages {
            let bytes = (0..PAGE_SIZE).map(&fill).collect();
            table.insert(
                PageAddr::containing(base + i * PAGE_SIZE),
                SimPage { bytes, protection },
            );
        }
        debug!("Mapped {} pages at 0x{:x} ({})", pages, base, protection);
        PageAddr::containing(base)
    }

    fn permits(&self, addr: usize, access: Access) -> bool {
        self.pages
            .borrow()
            .get(&PageAddr::containing(addr))
            .is_some_and(|page| page.protection.permits(access))
    }

    /// Blocks until `access` at `addr` is permitted, raising faults.
    fn check(&self, addr: usize, access: Access) -> Result<(), VictimError> {
        for _ in 0..MAX_REFAULTS {
            if self.permits(addr, access) {
                return Ok(());
            }
            self.raise(addr)?;
        }
        warn!(
            "{:?} at 0x{:x} still faults after {} attempts",
            access, addr, MAX_REFAULTS
        );
        Err(VictimError::Aborted(addr))
    }

    fn raise(&self, addr: usize) -> Result<(), VictimError> {
        let Some(handler) = self.handler.get() else {
            return Err(VictimError::Segfault(addr));
        };
        self.faults.set(self.faults.get() + 1);
        // SAFETY: the pointer was published by `deliver_to` and stays valid
        // until it returns; the handler is not otherwise borrowed meanwhile.
        let handler = unsafe { &mut *handler };
        match handler.on_fault(addr) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.handler.set(None);
                *self.fatal.borrow_mut() = Some(e);
                Err(VictimError::Aborted(addr))
            }
        }
    }

    fn with_byte<R>(&self, addr: usize, f: impl FnOnce(&mut u8) -> R) -> Result<R, VictimError> {
        let mut table = self.pages.borrow_mut();
        let page = table
            .get_mut(&PageAddr::containing(addr))
            .ok_or(VictimError::Segfault(addr))?;
        Ok(f(&mut page.bytes[addr % PAGE_SIZE]))
    }
}

impl ProtectionControl for SimPlatform {
    fn set_protection(
        &self,
        page: PageAddr,
        len: usize,
        protection: Protection,
    ) -> std::io::Result<()> {
        let mut table = self.pages.borrow_mut();
        let count = len.div_ceil(PAGE_SIZE);
        let bases: Vec<PageAddr> = (0..count)
            .map(|i| PageAddr::containing(page.as_usize() + i * PAGE_SIZE))
            .collect();
        // like mprotect, fail without changes if any page is unmapped
        if bases.iter().any(|base| !table.contains_key(base)) {
            return Err(std::io::Error::from(std::io::ErrorKind::OutOfMemory));
        }
        for base in bases {
            if let Some(entry) = table.get_mut(&base) {
                entry.protection = protection;
            }
        }
        Ok(())
    }
}

impl FaultSource for SimPlatform {
    fn deliver_to<R>(
        &self,
        handler: &mut dyn FaultHandler,
        run: impl FnOnce() -> R,
    ) -> Result<R, OracleError> {
        if self.handler.get().is_some() {
            return Err(OracleError::TrapInstall(std::io::Error::other(
                "a fault handler is already installed",
            )));
        }
        let raw: *mut (dyn FaultHandler + '_) = handler;
        // SAFETY: only the lifetime is erased; `Session` withdraws the pointer
        // before `handler` goes out of scope, even if `run` panics.
        let erased: ErasedHandler = unsafe { std::mem::transmute(raw) };
        self.handler.set(Some(erased));
        let session = Session(self);
        let result = run();
        drop(session);
        match self.fatal.take() {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }
}

struct Session<'a>(&'a SimPlatform);

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.0.handler.set(None);
    }
}

impl AddressSpace for SimPlatform {
    fn map_code(&self) -> Result<PageAddr, VictimError> {
        Ok(self.map(1, |_| RET, Protection::READ | Protection::EXEC))
    }

    fn map_data(&self, pages: usize) -> Result<PageAddr, VictimError> {
        if pages == 0 {
            return Err(VictimError::InvalidInput("cannot map zero pages".to_string()));
        }
        Ok(self.map(pages, |_| 0, Protection::READ | Protection::WRITE))
    }

    fn fetch(&self, page: PageAddr) -> Result<(), VictimError> {
        self.check(page.as_usize(), Access::Fetch)
    }

    fn load(&self, addr: usize) -> Result<u8, VictimError> {
        self.check(addr, Access::Read)?;
        self.with_byte(addr, |byte| *byte)
    }

    fn store(&self, addr: usize, value: u8) -> Result<(), VictimError> {
        self.check(addr, Access::Write)?;
        self.with_byte(addr, |byte| *byte = value)
    }
}
