use crate::native::NativeError;
use iced_x86::code_asm::CodeAssembler;
use memmap2::{Mmap, MmapOptions};
use pagestep_core::PageAddr;
use pagestep_core::util::PAGE_SIZE;

/// `int3`, fills the rest of every code page.
const INT3: u8 = 0xcc;

/// An executable page holding a single `ret`.
pub(crate) struct CodePage {
    _map: Mmap,
    base: PageAddr,
    entry: extern "C" fn(),
}

impl CodePage {
    pub(crate) fn new() -> Result<Self, NativeError> {
        let mut map = MmapOptions::new().len(PAGE_SIZE).map_anon()?;
        let base = PageAddr::containing(map.as_ptr() as usize);
        let stub = ret_stub(base.as_usize() as u64)?;
        map.fill(INT3);
        map[..stub.len()].copy_from_slice(&stub);
        let map = map.make_exec()?;
        // SAFETY: the page starts with a complete `ret` and stays mapped as
        // long as `_map` lives
        let entry: extern "C" fn() = unsafe { std::mem::transmute(map.as_ptr()) };
        Ok(Self {
            _map: map,
            base,
            entry,
        })
    }

    pub(crate) fn base(&self) -> PageAddr {
        self.base
    }

    pub(crate) fn entry(&self) -> extern "C" fn() {
        self.entry
    }
}

fn ret_stub(ip: u64) -> Result<Vec<u8>, iced_x86::IcedError> {
    let mut a = CodeAssembler::new(64)?;
    a.ret()?;
    a.assemble(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_is_single_ret() {
        assert_eq!(ret_stub(0x40_0000).expect("assemble"), vec![0xc3]);
    }

    #[test]
    fn test_code_page_is_callable() {
        let page = CodePage::new().expect("code page");
        assert_eq!(page.base().as_usize() % PAGE_SIZE, 0);
        (page.entry())();
    }
}
