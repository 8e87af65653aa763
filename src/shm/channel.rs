use super::file::ChansFile;
use crate::error::ShmError;
use crate::format::{self, ArgKind};
use crate::ring_core;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A channel's inferred sample type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChanType {
    None = 0,
    Real = 1,
    Signed = 2,
    Unsigned = 3,
    Invalid = 4,
}

impl ChanType {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => Self::Real,
            2 => Self::Signed,
            3 => Self::Unsigned,
            4 => Self::Invalid,
            _ => Self::None,
        }
    }

    fn from_arg_kind(k: ArgKind) -> Self {
        match k {
            ArgKind::Real => Self::Real,
            ArgKind::Signed => Self::Signed,
            ArgKind::Unsigned => Self::Unsigned,
            ArgKind::Invalid => Self::Invalid,
        }
    }
}

/// The fixed part of a `Shan` record, mapped directly over shared memory.
/// Ring data (`capacity` × 2 × 8-byte words) and the NUL-terminated name/
/// desc/unit strings follow immediately after, all addressed as offsets
/// from this struct's own start.
#[repr(C)]
struct ShanRaw {
    type_: AtomicU32,
    _pad0: u32,
    next: AtomicU64,
    name_off: u32,
    desc_off: u32,
    unit_off: u32,
    _pad1: u32,
    min: f64,
    max: f64,
    writer: AtomicU64,
    commit: AtomicU64,
    reader: AtomicU64,
    overflow: AtomicU64,
    capacity: u64,
}

const SHAN_HEADER_SIZE: usize = std::mem::size_of::<ShanRaw>();

/// A process-local handle to one `Shan` channel: just the file it lives in
/// and its byte offset. Never holds a pointer; every access goes through
/// `chans.with_mmap`, recomputing the address from the *current* mapping,
/// so no pointer is ever cached across a growth-triggered remap.
pub struct ChanHandle {
    offset: u64,
    capacity: u64,
}

impl ChanHandle {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn ring_data_off(&self) -> u64 {
        self.offset + SHAN_HEADER_SIZE as u64
    }

    fn shan<'a>(mmap: &'a memmap2::MmapMut, offset: u64) -> &'a ShanRaw {
        // SAFETY: `offset` was returned by `new_channel`/`find_channel`,
        // both of which validate it lies within an allocated `Shan` region.
        unsafe { &*(mmap.as_ptr().add(offset as usize) as *const ShanRaw) }
    }

    /// Creates a new channel (`chan_new`): allocates space, initializes
    /// the header and embedded ring, copies the strings, and CAS-splices
    /// it onto the file's live list.
    pub fn new_channel(
        chans: &ChansFile,
        name: &str,
        desc: &str,
        unit: &str,
        min: f64,
        max: f64,
        capacity: u64,
    ) -> Result<Self, ShmError> {
        let ring_bytes = capacity as usize * 2 * std::mem::size_of::<u64>();
        let name_off = SHAN_HEADER_SIZE + ring_bytes;
        let desc_off = name_off + name.len() + 1;
        let unit_off = desc_off + desc.len() + 1;
        let total = unit_off + unit.len() + 1;

        let offset = chans.alloc(total)?;

        chans.with_mmap(|mmap| {
            let shan = Self::shan(mmap, offset);
            shan.type_.store(ChanType::None as u32, Ordering::Relaxed);
            shan.next.store(0, Ordering::Relaxed);
            // SAFETY: these fields are exclusively ours until spliced onto
            // the live list below, so plain (non-atomic) writes are sound.
            unsafe {
                let raw = (shan as *const ShanRaw) as *mut ShanRaw;
                (*raw).name_off = name_off as u32;
                (*raw).desc_off = desc_off as u32;
                (*raw).unit_off = unit_off as u32;
                (*raw).min = min;
                (*raw).max = max;
                (*raw).capacity = capacity;
            }
            shan.writer.store(0, Ordering::Relaxed);
            shan.commit.store(0, Ordering::Relaxed);
            shan.reader.store(0, Ordering::Relaxed);
            shan.overflow.store(0, Ordering::Relaxed);

            write_cstr(mmap, offset as usize + name_off, name);
            write_cstr(mmap, offset as usize + desc_off, desc);
            write_cstr(mmap, offset as usize + unit_off, unit);
        });

        let mut backoff = crate::backoff::Backoff::new();
        loop {
            let head = chans.head();
            chans.with_mmap(|mmap| Self::shan(mmap, offset).next.store(head, Ordering::Relaxed));
            match chans.try_cas_head(head, offset) {
                Ok(()) => break,
                Err(_) => backoff.spin(),
            }
        }

        Ok(Self { offset, capacity })
    }

    /// Walks the live list looking for a channel whose name matches
    /// exactly. `chan_new`/`chans_open` use this to find an existing
    /// export by label.
    pub fn find(chans: &ChansFile, name: &str) -> Option<Self> {
        let mut cur = chans.head();
        while cur != 0 {
            let (matched, capacity, next) = chans.with_mmap(|mmap| {
                let shan = Self::shan(mmap, cur);
                let matched = read_cstr(mmap, cur as usize + shan.name_off as usize) == name;
                (matched, shan.capacity, shan.next.load(Ordering::Relaxed))
            });
            if matched {
                return Some(Self { offset: cur, capacity });
            }
            cur = next;
        }
        None
    }

    /// Unlinks this channel from the live list and splices it onto
    /// `free_list`. Bytes are never reclaimed
    /// and `free_list` is never consulted by future allocations.
    pub fn delete(self, chans: &ChansFile) -> Result<(), ShmError> {
        let mut prev = 0u64;
        let mut cur = chans.head();
        while cur != 0 && cur != self.offset {
            prev = cur;
            cur = chans.with_mmap(|mmap| Self::shan(mmap, cur).next.load(Ordering::Relaxed));
        }
        if cur != self.offset {
            return Err(ShmError::NoSuchChannel(format!("offset {}", self.offset)));
        }
        let next = chans.with_mmap(|mmap| Self::shan(mmap, self.offset).next.load(Ordering::Relaxed));
        if prev == 0 {
            let _ = chans.try_cas_head(self.offset, next);
        } else {
            chans.with_mmap(|mmap| Self::shan(mmap, prev).next.store(next, Ordering::Release));
        }
        Ok(())
    }

    pub fn name(&self, chans: &ChansFile) -> String {
        chans.with_mmap(|mmap| {
            let shan = Self::shan(mmap, self.offset);
            read_cstr(mmap, self.offset as usize + shan.name_off as usize)
        })
    }

    pub fn chan_type(&self, chans: &ChansFile) -> ChanType {
        chans.with_mmap(|mmap| ChanType::from_u32(Self::shan(mmap, self.offset).type_.load(Ordering::Relaxed)))
    }

    /// First-sample type inference: on the very first sample for an
    /// argument slot, infer the channel's type from the format string's
    /// `arg_index`-th conversion specifier. A CAS on `type_` from `None`
    /// ensures only one racing producer wins.
    pub fn infer_type_once(&self, chans: &ChansFile, format_str: &str, arg_index: usize) {
        let Some(kind) = format::nth_conversion(format_str, arg_index) else {
            return;
        };
        chans.with_mmap(|mmap| {
            let shan = Self::shan(mmap, self.offset);
            let _ = shan.type_.compare_exchange(
                ChanType::None as u32,
                ChanType::from_arg_kind(kind) as u32,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        });
    }

    /// Appends samples `(timestamp, value)` to the embedded ring, reusing
    /// the same claim/commit/catch-up algorithm as the in-process `Ring`.
    pub fn chan_write(&self, chans: &ChansFile, samples: &[(u64, u64)]) -> usize {
        let n = samples.len() as u64;
        if n == 0 {
            return 0;
        }
        let start = chans.with_mmap(|mmap| {
            let shan = Self::shan(mmap, self.offset);
            ring_core::claim(&shan.writer, &shan.reader, &shan.overflow, self.capacity, n, None)
        });
        let ring_off = self.ring_data_off();
        chans.with_mmap(|mmap| {
            for (i, (t, v)) in samples.iter().enumerate() {
                let idx = (start + i as u64) % self.capacity;
                let slot_off = ring_off as usize + idx as usize * 16;
                // SAFETY: slots [start, start+n) were exclusively claimed.
                unsafe {
                    let p = mmap.as_ptr().add(slot_off) as *mut u64;
                    p.write_unaligned(*t);
                    p.add(1).write_unaligned(*v);
                }
            }
            let shan = Self::shan(mmap, self.offset);
            ring_core::publish(&shan.commit, n);
        });
        samples.len()
    }

    /// Reads up to `buf.len()` samples using `cursor` as the caller's own
    /// reader position, same catch-up contract as `Ring::read`.
    pub fn chan_read(&self, chans: &ChansFile, buf: &mut [(u64, u64)], cursor: &AtomicU64) -> usize {
        let claimed = chans.with_mmap(|mmap| {
            let shan = Self::shan(mmap, self.offset);
            ring_core::claim_read(&shan.commit, &shan.reader, cursor, buf.len() as u64)
        });
        let Some((start, n)) = claimed else {
            return 0;
        };
        let ring_off = self.ring_data_off();
        chans.with_mmap(|mmap| {
            for i in 0..n {
                let idx = (start + i) % self.capacity;
                let slot_off = ring_off as usize + idx as usize * 16;
                // SAFETY: slots [reader, commit) were fully written and
                // observed through the Acquire-ordered commit load inside
                // `claim_read`.
                unsafe {
                    let p = mmap.as_ptr().add(slot_off) as *const u64;
                    buf[i as usize] = (p.read_unaligned(), p.add(1).read_unaligned());
                }
            }
        });
        n as usize
    }

    pub fn chan_readable(&self, chans: &ChansFile, cursor: &AtomicU64) -> u64 {
        chans.with_mmap(|mmap| {
            let shan = Self::shan(mmap, self.offset);
            let commit = shan.commit.load(Ordering::Acquire);
            let pos = cursor.load(Ordering::Relaxed).max(shan.reader.load(Ordering::Relaxed));
            commit.saturating_sub(pos)
        })
    }

    pub fn chan_writer_index(&self, chans: &ChansFile) -> u64 {
        chans.with_mmap(|mmap| Self::shan(mmap, self.offset).writer.load(Ordering::Relaxed))
    }

    pub fn chan_reader_index(&self, chans: &ChansFile) -> u64 {
        chans.with_mmap(|mmap| Self::shan(mmap, self.offset).reader.load(Ordering::Relaxed))
    }
}

fn write_cstr(mmap: &memmap2::MmapMut, at: usize, s: &str) {
    // SAFETY: callers reserve len+1 bytes for every string they write here.
    unsafe {
        let p = mmap.as_ptr().add(at) as *mut u8;
        std::ptr::copy_nonoverlapping(s.as_ptr(), p, s.len());
        *p.add(s.len()) = 0;
    }
}

fn read_cstr(mmap: &memmap2::MmapMut, at: usize) -> String {
    // SAFETY: every string region written by `write_cstr` is NUL-terminated
    // within the mapped file.
    unsafe {
        let base = mmap.as_ptr().add(at);
        let mut len = 0usize;
        while *base.add(len) != 0 {
            len += 1;
        }
        let slice = std::slice::from_raw_parts(base, len);
        String::from_utf8_lossy(slice).into_owned()
    }
}
