// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Command Line Parsing
//!
//! Boot arguments arrive as one string of whitespace-separated `key=value`
//! pairs. A key without `=` is stored with an empty value, which reads as
//! `true` for boolean lookups. Control characters are replaced by `.` and the
//! last occurrence of a key wins.
//!
//! # Usage
//!
//! ```rust
//! use rustux_taskcore::kernel::cmdline::Cmdline;
//!
//! let cmdline = Cmdline::parse("kernel.smp.cpus=4 kernel.halt");
//! assert_eq!(cmdline.get_uint32("kernel.smp.cpus", 1), 4);
//! assert!(cmdline.get_bool("kernel.halt", false));
//! assert_eq!(cmdline.get_uint32("kernel.serial.port", 0x3f8), 0x3f8);
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use crate::log_warn;

/// Maximum command line size
pub const CMDLINE_MAX: usize = 4096;

/// Parsed kernel command line
#[derive(Debug, Clone, Default)]
pub struct Cmdline {
    entries: Vec<(String, String)>,
}

impl Cmdline {
    pub fn parse(data: &str) -> Self {
        let mut cmdline = Self::default();
        cmdline.append(data);
        cmdline
    }

    /// Append more arguments
    ///
    /// Input beyond [`CMDLINE_MAX`] bytes in total is dropped.
    pub fn append(&mut self, data: &str) {
        let mut budget = CMDLINE_MAX.saturating_sub(self.size());
        if data.len() > budget {
            log_warn!("cmdline: truncating {} bytes of arguments", data.len() - budget);
        }
        for arg in data.split_whitespace() {
            if arg.len() > budget {
                break;
            }
            budget -= arg.len();

            let arg: String = arg
                .chars()
                .map(|c| if c.is_control() { '.' } else { c })
                .collect();
            let (key, value) = match arg.split_once('=') {
                Some((key, value)) => (String::from(key), String::from(value)),
                None => (arg, String::new()),
            };
            if key.is_empty() {
                continue;
            }
            self.entries.retain(|(k, _)| *k != key);
            self.entries.push((key, value));
        }
    }

    fn size(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len() + 1).sum()
    }

    /// Raw value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Boolean value; `0`, `false` and `off` read as false
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(value) => !matches!(value, "0" | "false" | "off"),
            None => default,
        }
    }

    pub fn get_uint32(&self, key: &str, default: u32) -> u32 {
        self.get_parsed(key).unwrap_or(default)
    }

    pub fn get_uint64(&self, key: &str, default: u64) -> u64 {
        self.get_parsed(key).unwrap_or(default)
    }

    fn get_parsed<T: TryFrom<u64>>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        let parsed = match value.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => value.parse::<u64>().ok(),
        };
        match parsed.and_then(|v| T::try_from(v).ok()) {
            Some(v) => Some(v),
            None => {
                log_warn!("cmdline: ignoring malformed value {}={}", key, value);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
