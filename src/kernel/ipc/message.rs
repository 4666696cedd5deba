// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Message Registers
//!
//! Every thread owns 64 message registers (MRs) and 33 buffer registers
//! (BRs). A message is the tag in MR0 followed by the words the tag counts:
//! first the untyped words, then the typed items, two words each. BR0 holds
//! the receiver's acceptor, the window its address space accepts regions in.
//!
//! # Tag Layout
//!
//! ```text
//!  63                16 15    12 11     6 5      0
//! +--------------------+--------+--------+--------+
//! |       label        | flags  | typed  |untyped |
//! +--------------------+--------+--------+--------+
//! ```
//!
//! Flag bit 15 marks a message whose region transfer failed.
//!
//! # Typed Items
//!
//! ```text
//! word 0:  send base (bits 10..)            | type (bits 0..4)
//! word 1:  fpage base (bits 10..) | log2 size (bits 4..10) | rights (bits 0..3)
//! ```
//!
//! Type `0b1000` maps the region, `0b1010` grants it.
//!
//! # Usage
//!
//! ```rust
//! use rustux_taskcore::kernel::ipc::MessageRegisters;
//! use rustux_taskcore::{Fpage, MessageItem, MessageTag, PageRights};
//!
//! let page = Fpage::new(0x40_0000, 12, PageRights::READ);
//! let mut regs = MessageRegisters::new();
//! regs.set_message_tag(MessageTag::new(7, 1, 2));
//! regs.set_mr(1, 0xabcd).unwrap();
//! regs.load_mrs(2, &MessageItem::Map { page, base: 0 }.typed_words().unwrap()).unwrap();
//!
//! let items: Vec<_> = regs.items().collect();
//! assert_eq!(items[0], Ok(MessageItem::Untyped(0xabcd)));
//! assert_eq!(items[1], Ok(MessageItem::Map { page, base: 0 }));
//! ```

use core::fmt;

use crate::kernel::vm::{PageRights, Region, PAGE_SHIFT};
use crate::rustux::errors::{Error, Result};
use crate::rustux::types::{VAddr, Word};

/// Number of message registers
pub const MR_SIZE: usize = 64;

/// Number of buffer registers
pub const BR_SIZE: usize = 33;

/// Largest region an fpage can describe, as log2 of its size
pub const FPAGE_MAX_LOG2: u32 = 32;

/// Bits of a word below an fpage or send base
const BASE_SHIFT: u32 = 10;
const BASE_MASK: Word = !((1 << BASE_SHIFT) - 1);

/// ============================================================================
/// Message Tag
/// ============================================================================

/// MR0: item counts, flags and label
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageTag(Word);

impl MessageTag {
    const COUNT_MASK: Word = 0x3f;
    const TYPED_SHIFT: u32 = 6;
    const FLAGS_SHIFT: u32 = 12;
    const LABEL_SHIFT: u32 = 16;

    /// Set when a typed item could not be transferred
    pub const FLAG_ERROR: Word = 1 << 15;

    /// Tag with `untyped` untyped words and `typed` typed words
    pub const fn new(label: u64, untyped: usize, typed: usize) -> Self {
        Self(
            (label << Self::LABEL_SHIFT)
                | ((typed as Word & Self::COUNT_MASK) << Self::TYPED_SHIFT)
                | (untyped as Word & Self::COUNT_MASK),
        )
    }

    pub const fn from_raw(raw: Word) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> Word {
        self.0
    }

    pub const fn untyped(self) -> usize {
        (self.0 & Self::COUNT_MASK) as usize
    }

    /// Number of typed words, two per item
    pub const fn typed(self) -> usize {
        ((self.0 >> Self::TYPED_SHIFT) & Self::COUNT_MASK) as usize
    }

    pub const fn flags(self) -> Word {
        (self.0 >> Self::FLAGS_SHIFT) & 0xf
    }

    pub const fn label(self) -> u64 {
        self.0 >> Self::LABEL_SHIFT
    }

    /// Words following the tag
    pub const fn words(self) -> usize {
        self.untyped() + self.typed()
    }

    pub const fn is_empty(self) -> bool {
        self.words() == 0
    }

    pub const fn has_error(self) -> bool {
        self.0 & Self::FLAG_ERROR != 0
    }

    pub const fn with_error(self) -> Self {
        Self(self.0 | Self::FLAG_ERROR)
    }

    /// Check the tag describes a message that fits the registers
    pub fn validate(self) -> Result {
        if self.words() > MR_SIZE - 1 || self.typed() % 2 != 0 {
            return Err(Error::InvalidArgs);
        }
        Ok(())
    }
}

impl fmt::Debug for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MessageTag(label={:#x}, u={}, t={}, flags={:#x})",
            self.label(),
            self.untyped(),
            self.typed(),
            self.flags()
        )
    }
}

/// ============================================================================
/// Flexpages
/// ============================================================================

/// Size-aligned region with access rights, packed into one word
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Fpage(Word);

impl Fpage {
    pub const NIL: Fpage = Fpage(0);

    const SIZE_SHIFT: u32 = 4;
    const SIZE_MASK: Word = 0x3f;
    const RIGHTS_MASK: Word = 0x7;

    pub fn new(base: VAddr, size_log2: u32, rights: PageRights) -> Self {
        Self(
            (base as Word & BASE_MASK)
                | ((size_log2 as Word & Self::SIZE_MASK) << Self::SIZE_SHIFT)
                | (rights.bits() as Word & Self::RIGHTS_MASK),
        )
    }

    pub const fn from_raw(raw: Word) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> Word {
        self.0
    }

    pub const fn is_nil(self) -> bool {
        self.size_log2() == 0
    }

    pub const fn base(self) -> VAddr {
        (self.0 & BASE_MASK) as VAddr
    }

    pub const fn size_log2(self) -> u32 {
        ((self.0 >> Self::SIZE_SHIFT) & Self::SIZE_MASK) as u32
    }

    pub const fn size(self) -> usize {
        1 << self.size_log2()
    }

    pub fn rights(self) -> PageRights {
        PageRights::from_bits_truncate((self.0 & Self::RIGHTS_MASK) as u32)
    }

    pub fn region(self) -> Region {
        Region::new(self.base(), self.size())
    }

    /// At least a page, at most [`FPAGE_MAX_LOG2`], base aligned to the size
    pub fn validate(self) -> Result<Self> {
        let log2 = self.size_log2();
        if !(PAGE_SHIFT as u32..=FPAGE_MAX_LOG2).contains(&log2) || self.base() & (self.size() - 1) != 0 {
            return Err(Error::InvalidArgs);
        }
        Ok(self)
    }
}

impl fmt::Debug for Fpage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            return write!(f, "Fpage(nil)");
        }
        write!(f, "Fpage({:#x}/{}, {:?})", self.base(), self.size_log2(), self.rights())
    }
}

/// BR0: where the receiver takes incoming regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Acceptor(Word);

impl Acceptor {
    pub fn new(window: Fpage) -> Self {
        Self(window.raw())
    }

    pub const fn from_raw(raw: Word) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> Word {
        self.0
    }

    pub fn window(self) -> Fpage {
        Fpage::from_raw(self.0)
    }

    /// Match a sent fpage against the window
    ///
    /// Returns the (send, receive) regions. The smaller of the two fpages
    /// decides the size; `base` picks where in the larger one it lands.
    pub fn accept(self, page: Fpage, base: VAddr) -> Result<(Region, Region)> {
        let window = self.window();
        if window.is_nil() {
            return Err(Error::AccessDenied);
        }
        let window = window.validate()?;
        let page = page.validate()?;

        if page.size_log2() <= window.size_log2() {
            let offset = base & (window.size() - 1) & !(page.size() - 1);
            Ok((page.region(), Region::new(window.base() + offset, page.size())))
        } else {
            let offset = base & (page.size() - 1) & !(window.size() - 1);
            Ok((Region::new(page.base() + offset, window.size()), window.region()))
        }
    }
}

/// ============================================================================
/// Message Items
/// ============================================================================

/// One decoded item of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageItem {
    Untyped(Word),
    Map { page: Fpage, base: VAddr },
    Grant { page: Fpage, base: VAddr },
}

impl MessageItem {
    const TYPE_MASK: Word = 0xf;
    const TYPE_MAP: Word = 0b1000;
    const TYPE_GRANT: Word = 0b1010;

    /// Decode a typed item from its two words
    pub fn decode(word0: Word, word1: Word) -> Result<Self> {
        let page = Fpage::from_raw(word1);
        let base = (word0 & BASE_MASK) as VAddr;
        match word0 & Self::TYPE_MASK {
            Self::TYPE_MAP => Ok(MessageItem::Map { page, base }),
            Self::TYPE_GRANT => Ok(MessageItem::Grant { page, base }),
            _ => Err(Error::InvalidArgs),
        }
    }

    /// The two words of a typed item; `None` for untyped words
    pub fn typed_words(&self) -> Option<[Word; 2]> {
        match *self {
            MessageItem::Untyped(_) => None,
            MessageItem::Map { page, base } => Some([(base as Word & BASE_MASK) | Self::TYPE_MAP, page.raw()]),
            MessageItem::Grant { page, base } => Some([(base as Word & BASE_MASK) | Self::TYPE_GRANT, page.raw()]),
        }
    }
}

/// ============================================================================
/// Register File
/// ============================================================================

/// Message and buffer registers of one thread
#[derive(Clone)]
pub struct MessageRegisters {
    mr: [Word; MR_SIZE],
    br: [Word; BR_SIZE],
    mr_count: usize,
    br_count: usize,
}

impl Default for MessageRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRegisters {
    pub const fn new() -> Self {
        Self {
            mr: [0; MR_SIZE],
            br: [0; BR_SIZE],
            mr_count: 0,
            br_count: 0,
        }
    }

    pub fn get_mr(&self, index: usize) -> Result<Word> {
        self.mr.get(index).copied().ok_or(Error::OutOfRange)
    }

    pub fn set_mr(&mut self, index: usize, value: Word) -> Result {
        *self.mr.get_mut(index).ok_or(Error::OutOfRange)? = value;
        self.mr_count = self.mr_count.max(index + 1);
        Ok(())
    }

    pub fn get_br(&self, index: usize) -> Result<Word> {
        self.br.get(index).copied().ok_or(Error::OutOfRange)
    }

    pub fn set_br(&mut self, index: usize, value: Word) -> Result {
        *self.br.get_mut(index).ok_or(Error::OutOfRange)? = value;
        self.br_count = self.br_count.max(index + 1);
        Ok(())
    }

    /// MRs written since the tag was set, the tag included
    pub fn mr_count(&self) -> usize {
        self.mr_count
    }

    pub fn br_count(&self) -> usize {
        self.br_count
    }

    pub fn message_tag(&self) -> MessageTag {
        MessageTag::from_raw(self.mr[0])
    }

    /// Store a new tag in MR0, forgetting earlier MR writes
    pub fn set_message_tag(&mut self, tag: MessageTag) {
        self.mr[0] = tag.raw();
        self.mr_count = 1;
    }

    /// Mark the message in MR0 as having failed a region transfer
    pub(crate) fn flag_transfer_error(&mut self) {
        self.mr[0] |= MessageTag::FLAG_ERROR;
    }

    pub fn acceptor(&self) -> Acceptor {
        Acceptor::from_raw(self.br[0])
    }

    /// Store a new acceptor in BR0, forgetting earlier BR writes
    pub fn set_acceptor(&mut self, acceptor: Acceptor) {
        self.br[0] = acceptor.raw();
        self.br_count = 1;
    }

    /// Copy `words` into consecutive MRs from `start`
    pub fn load_mrs(&mut self, start: usize, words: &[Word]) -> Result {
        let end = start.checked_add(words.len()).ok_or(Error::OutOfRange)?;
        let slots = self.mr.get_mut(start..end).ok_or(Error::OutOfRange)?;
        slots.copy_from_slice(words);
        self.mr_count = self.mr_count.max(end);
        Ok(())
    }

    /// Copy consecutive MRs from `start` into `out`
    pub fn store_mrs(&self, start: usize, out: &mut [Word]) -> Result {
        let end = start.checked_add(out.len()).ok_or(Error::OutOfRange)?;
        let slots = self.mr.get(start..end).ok_or(Error::OutOfRange)?;
        out.copy_from_slice(slots);
        Ok(())
    }

    /// Deliver every MR to `dst`; its BRs are left alone
    pub fn copy_to(&self, dst: &mut MessageRegisters) {
        dst.mr = self.mr;
        dst.mr_count = self.mr_count;
    }

    /// Decode the message described by the tag
    pub fn items(&self) -> impl Iterator<Item = Result<MessageItem>> + '_ {
        let tag = self.message_tag();
        let untyped_end = (1 + tag.untyped()).min(MR_SIZE);
        let typed_end = (untyped_end + tag.typed()).min(MR_SIZE);

        let untyped = self.mr[1..untyped_end]
            .iter()
            .map(|&word| Ok(MessageItem::Untyped(word)));
        let typed = self.mr[untyped_end..typed_end]
            .chunks(2)
            .map(|pair| match *pair {
                [word0, word1] => MessageItem::decode(word0, word1),
                _ => Err(Error::InvalidArgs),
            });
        untyped.chain(typed)
    }
}

impl fmt::Debug for MessageRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegisters")
            .field("tag", &self.message_tag())
            .field("mr_count", &self.mr_count)
            .field("acceptor", &self.acceptor().window())
            .field("br_count", &self.br_count)
            .finish()
    }
}
