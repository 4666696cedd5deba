// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Scenario Tests
//!
//! Whole-kernel tests driven through the public entry points, plus the
//! shared [`fixture`] the per-module unit tests build on.

pub(crate) mod fixture;

mod ipc_tests;
mod sched_tests;
