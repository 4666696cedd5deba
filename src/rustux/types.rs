// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Primitive kernel types and status codes

/// Status code returned across the syscall boundary
pub type Status = i32;

/// Kernel object identifier
pub type Koid = u64;

/// Virtual address
pub type VAddr = usize;

/// Logical CPU number
pub type CpuId = u32;

/// Monotonic scheduler tick count
pub type Tick = u64;

/// One message or buffer register
pub type Word = u64;

/// Koid that is never assigned to an object
pub const KOID_INVALID: Koid = 0;

/// ============================================================================
/// Status Codes
/// ============================================================================

pub mod status {
    use super::Status;

    pub const OK: Status = 0;
}

/// Error codes
pub mod err {
    use super::Status;

    pub const RX_ERR_INVALID_ARGS: Status = -2;
    pub const RX_ERR_BAD_HANDLE: Status = -3;
    pub const RX_ERR_BAD_STATE: Status = -4;
    pub const RX_ERR_NOT_SUPPORTED: Status = -5;
    pub const RX_ERR_NO_MEMORY: Status = -6;
    pub const RX_ERR_TIMED_OUT: Status = -7;
    pub const RX_ERR_NOT_FOUND: Status = -8;
    pub const RX_ERR_ALREADY_EXISTS: Status = -9;
    pub const RX_ERR_ACCESS_DENIED: Status = -10;
    pub const RX_ERR_INTERNAL: Status = -12;
    pub const RX_ERR_NO_RESOURCES: Status = -15;
    pub const RX_ERR_OUT_OF_RANGE: Status = -17;
    pub const RX_ERR_WRONG_TYPE: Status = -19;
    pub const RX_ERR_PEER_CLOSED: Status = -20;
    pub const RX_ERR_INTERRUPTED: Status = -21;
}
