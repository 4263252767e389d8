/// Cache-timing primitives on attacker-visible addresses.
pub trait CacheProbe {
    /// Evicts the cache line containing `addr` from every cache level.
    fn flush(&self, addr: usize);

    /// Loads `addr` and returns the access latency in cycles.
    fn measure_access_time(&self, addr: usize) -> u64;
}

impl<T: CacheProbe + ?Sized> CacheProbe for &T {
    fn flush(&self, addr: usize) {
        (**self).flush(addr)
    }

    fn measure_access_time(&self, addr: usize) -> u64 {
        (**self).measure_access_time(addr)
    }
}

/// `clflush` and `rdtscp` based probe.
#[cfg(target_arch = "x86_64")]
pub struct Rdtscp {
    _private: (),
}

#[cfg(target_arch = "x86_64")]
impl Rdtscp {
    /// Creates the probe.
    ///
    /// # Safety
    ///
    /// Every address later passed to the probe must be mapped and readable.
    pub unsafe fn new() -> Self {
        Rdtscp { _private: () }
    }
}

#[cfg(target_arch = "x86_64")]
impl CacheProbe for Rdtscp {
    fn flush(&self, addr: usize) {
        use std::arch::x86_64::{_mm_clflush, _mm_mfence};
        // SAFETY: guaranteed readable by the contract of `Rdtscp::new`
        unsafe {
            _mm_clflush(addr as *const u8);
            _mm_mfence();
        }
    }

    fn measure_access_time(&self, addr: usize) -> u64 {
        use std::arch::x86_64::{__rdtscp, _mm_mfence};
        let mut aux = 0;
        // SAFETY: guaranteed readable by the contract of `Rdtscp::new`
        unsafe {
            _mm_mfence();
            let start = __rdtscp(&mut aux);
            std::hint::black_box(std::ptr::read_volatile(addr as *const u8));
            let end = __rdtscp(&mut aux);
            _mm_mfence();
            end.saturating_sub(start)
        }
    }
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;

    #[test]
    #[ignore = "cycle counts on shared or virtualized cores are too noisy for a unit test"]
    fn test_cached_access_is_not_slower_than_flushed() {
        let line = Box::new([0u8; 64]);
        let addr = line.as_ptr() as usize;
        // SAFETY: `line` outlives the probe
        let probe = unsafe { Rdtscp::new() };
        let mut cached = Vec::new();
        let mut flushed = Vec::new();
        for _ in 0..200 {
            probe.measure_access_time(addr);
            cached.push(probe.measure_access_time(addr));
            probe.flush(addr);
            flushed.push(probe.measure_access_time(addr));
        }
        let cached = pagestep_core::util::median(&cached).expect("samples");
        let flushed = pagestep_core::util::median(&flushed).expect("samples");
        assert!(cached <= flushed, "cached {} > flushed {}", cached, flushed);
    }
}
