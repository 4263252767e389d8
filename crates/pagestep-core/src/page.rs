//! Monitored pages: base addresses, protections and roles.

use crate::util::{PAGE_MASK, PAGE_SIZE};
use bitflags::bitflags;
use serde::{Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};

/// Page-aligned base address of a monitored page.
///
/// Faulting addresses are folded onto their page with [`PageAddr::containing`],
/// so every lookup is keyed by the same aligned value.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PageAddr(usize);

impl PageAddr {
    /// Returns the page that contains `addr`.
    pub const fn containing(addr: usize) -> Self {
        PageAddr(addr & !PAGE_MASK)
    }

    /// Returns the page immediately following this one.
    pub const fn next(self) -> Self {
        PageAddr(self.0 + PAGE_SIZE)
    }

    /// Returns the base address as a usize.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns `true` if `addr` lies inside this page.
    pub const fn contains(self, addr: usize) -> bool {
        addr >= self.0 && addr - self.0 < PAGE_SIZE
    }
}

impl Debug for PageAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("PageAddr(0x{:x})", self.0))
    }
}

impl Display for PageAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<PageAddr> for usize {
    fn from(value: PageAddr) -> Self {
        value.0
    }
}

bitflags! {
    /// Page protection mask.
    ///
    /// The empty mask is [`Protection::NONE`]. Access checks follow x86 paging,
    /// where any mapping that is writable or executable is also readable.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Protection: u8 {
        /// Loads are allowed
        const READ = 1 << 0;
        /// Stores are allowed
        const WRITE = 1 << 1;
        /// Instruction fetches are allowed
        const EXEC = 1 << 2;
    }
}

impl Protection {
    /// No access at all
    pub const NONE: Self = Self::empty();

    /// Returns `true` if an access of kind `access` retires under this protection.
    pub fn permits(self, access: Access) -> bool {
        match access {
            Access::Read => !self.is_empty(),
            Access::Write => self.contains(Protection::WRITE),
            Access::Fetch => self.contains(Protection::EXEC),
        }
    }
}

impl Display for Protection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(self.contains(Protection::READ), 'r'),
            flag(self.contains(Protection::WRITE), 'w'),
            flag(self.contains(Protection::EXEC), 'x')
        )
    }
}

impl Serialize for Protection {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Kind of memory access performed by the victim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Data load
    Read,
    /// Data store
    Write,
    /// Instruction fetch
    Fetch,
}

/// What a monitored page holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Role {
    /// Victim data; any number of data pages may be monitored
    Data,
    /// The code page of the victim's `square` routine
    CodeSquare,
    /// The code page of the victim's `multiply` routine
    CodeMultiply,
    /// The code page of the victim's `modpow` loop
    CodeModpow,
}

impl Role {
    /// Returns `true` for the three code roles, which are unique per run.
    pub fn is_code(self) -> bool {
        !matches!(self, Role::Data)
    }

    /// The protection the victim expects this page to have outside a run.
    pub fn resting_protection(self) -> Protection {
        match self {
            Role::Data => Protection::READ | Protection::WRITE,
            _ => Protection::READ | Protection::EXEC,
        }
    }

    /// Single-letter tag used when rendering traces.
    pub fn tag(self) -> char {
        match self {
            Role::Data => 'D',
            Role::CodeSquare => 'S',
            Role::CodeMultiply => 'M',
            Role::CodeModpow => 'P',
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Data => "data",
            Role::CodeSquare => "square",
            Role::CodeMultiply => "multiply",
            Role::CodeModpow => "modpow",
        };
        f.write_str(name)
    }
}

/// A monitored page and its current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Page {
    /// Aligned base address
    pub base: PageAddr,
    /// Protection currently applied
    pub protection: Protection,
    /// What the page holds
    pub role: Role,
    /// Protection applied again when the run ends
    pub restore: Protection,
}
