// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustux common types and utilities

pub mod errors;
pub mod types;

// Type aliases for C compatibility
pub use types::Status as rx_status_t;
pub use types::VAddr as vaddr_t;

pub use errors::*;
pub use types::*;
