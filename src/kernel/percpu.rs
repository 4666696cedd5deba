// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Per-CPU Data
//!
//! Each core owns one scheduler (run queue, zombie queue, timer list) and
//! one idle thread. Everything indexed by CPU number goes through
//! [`cpu_index`], which rejects numbers the kernel was not booted with.

use crate::kassert;
use crate::rustux::types::CpuId;

/// ============================================================================
/// Constants
/// ============================================================================

/// Maximum number of CPUs supported
pub const SMP_MAX_CPUS: usize = 8;

/// CPU ID for the boot processor
pub const BOOT_CPU_ID: CpuId = 0;

/// Map a CPU number onto a per-CPU slot
///
/// A CPU number outside the booted set is a kernel bug.
pub fn cpu_index(cpu: CpuId, cpu_count: usize) -> usize {
    let index = cpu as usize;
    kassert!(index < cpu_count, "cpu {} out of range ({} online)", cpu, cpu_count);
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_index() {
        assert_eq!(cpu_index(BOOT_CPU_ID, 1), 0);
        assert_eq!(cpu_index(3, 4), 3);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_cpu_index_out_of_range() {
        cpu_index(2, 2);
    }
}
