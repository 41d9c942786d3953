// SPDX-License-Identifier: MPL-2.0

//! Hardware random numbers.

/// Returns one `rdrand` value, or `None` if the instruction keeps failing
/// or is unavailable. Callers must tolerate `None`.
pub fn read_random() -> Option<u64> {
    // Recommended retry count per the Intel SDM.
    const RETRIES: usize = 10;

    if !has_rdrand() {
        return None;
    }
    for _ in 0..RETRIES {
        let mut val = 0u64;
        // SAFETY: `rdrand` support was just checked.
        if unsafe { core::arch::x86_64::_rdrand64_step(&mut val) } == 1 {
            return Some(val);
        }
    }
    None
}

fn has_rdrand() -> bool {
    let cpuid = x86::cpuid::CpuId::new();
    cpuid
        .get_feature_info()
        .map(|f| f.has_rdrand())
        .unwrap_or(false)
}
