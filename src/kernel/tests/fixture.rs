// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Test fixture: a kernel with one process and a few threads in the root job

use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::kernel::init::KernelConfig;
use crate::kernel::process::Process;
use crate::kernel::thread::{Thread, ThreadIndex};
use crate::kernel::Kernel;

pub(crate) struct Fixture {
    pub kernel: Kernel,
    pub process: Arc<Process>,
    pub threads: Vec<Arc<Thread>>,
}

impl Fixture {
    /// One CPU, `n` embryo threads
    pub fn new(n: usize) -> Self {
        Self::with_cpus(1, n)
    }

    pub fn with_cpus(cpus: usize, n: usize) -> Self {
        let kernel = Kernel::new(KernelConfig {
            cpu_count: cpus,
            ..KernelConfig::default()
        });
        let process = kernel.create_process(&kernel.root_job(), "fixture").unwrap();
        let threads = (0..n)
            .map(|i| kernel.create_thread(&process, &format!("t{}", i)).unwrap())
            .collect();
        Self {
            kernel,
            process,
            threads,
        }
    }

    /// One CPU, `n` threads started on it in order
    pub fn started(n: usize) -> Self {
        let fx = Self::new(n);
        for thread in &fx.threads {
            fx.kernel.start_thread(thread, 0).unwrap();
        }
        fx
    }

    pub fn indices<const N: usize>(&self) -> [ThreadIndex; N] {
        core::array::from_fn(|i| self.threads[i].index())
    }

    pub fn threads<const N: usize>(&self) -> [Arc<Thread>; N] {
        core::array::from_fn(|i| self.threads[i].clone())
    }
}
