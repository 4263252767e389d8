/// Page shift value (12 bits) for 4KB pages
pub const PAGE_SHIFT: usize = 12;
/// Standard page size (4096 bytes)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// Mask for extracting page offset
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Cache line size (64 bytes) for x86_64
pub const CL_SIZE: usize = 64;

/// Default upper bound on the number of faults recorded per run
pub const DEFAULT_TRACE_CAPACITY: usize = 1000;

/// Bit width of the toy RSA exponents
pub const EXPONENT_BITS: u32 = 16;
