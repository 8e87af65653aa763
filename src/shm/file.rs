use crate::error::ShmError;
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// 32-bit magic identifying a `Shans` file: "SHAN" in ASCII.
pub const MAGIC: u32 = 0x5348_414e;
/// Bumped on any incompatible layout change.
pub const VERSION: u32 = 1;

const PAGE: usize = 4096;
const ALIGN: usize = std::mem::align_of::<u64>();

/// The fixed-size file header, mapped directly over the start of the file.
/// Fields after `magic`/`version` are atomics so `alloc`/`register_head`
/// can be called concurrently by exporting producers in different
/// processes sharing the same mapping.
#[repr(C)]
struct ShansHeaderRaw {
    magic: u32,
    version: u32,
    _pad: u32,
    _pad2: u32,
    head: AtomicU64,
    free_list: AtomicU64,
    alloc_cursor: AtomicU64,
}

pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<ShansHeaderRaw>();

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// A mapped `Shans` file. Growth replaces the `MmapMut` under a write lock;
/// every accessor recomputes offsets from the *current* mapping rather than
/// caching a base pointer, so an in-flight remap never leaves a stale
/// reference alive.
pub struct ChansFile {
    path: PathBuf,
    file: File,
    mmap: RwLock<MmapMut>,
}

impl ChansFile {
    /// `chans_new`: creates (truncating) the file at `path`, mode `0600`,
    /// extends to one page, maps it `SHARED`, and writes a fresh header.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ShmError> {
        let path = path.as_ref().to_path_buf();
        log::info!("creating shared-memory export file at {:?}", path);
        let file = open_create(&path)?;
        file.set_len(PAGE as u64).map_err(|e| io_err(&path, e))?;
        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| io_err(&path, e))?;

        // SAFETY: the file was just truncated to PAGE bytes, which is
        // larger than HEADER_SIZE, and the mapping is exclusively ours at
        // this point.
        let hdr = unsafe { &mut *(mmap.as_mut_ptr() as *mut ShansHeaderRaw) };
        hdr.magic = MAGIC;
        hdr.version = VERSION;
        hdr.head = AtomicU64::new(0);
        hdr.free_list = AtomicU64::new(0);
        hdr.alloc_cursor = AtomicU64::new(HEADER_SIZE as u64);

        Ok(Self { path, file, mmap: RwLock::new(mmap) })
    }

    /// `chans_open`: opens an existing file read/write, validates the
    /// header, and maps the whole thing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ShmError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path).map_err(|e| io_err(&path, e))?;
        let len = file.metadata().map_err(|e| io_err(&path, e))?.len() as usize;
        if len < HEADER_SIZE {
            return Err(ShmError::TooSmall { path, need: HEADER_SIZE, found: len });
        }
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| io_err(&path, e))?;

        let (magic, version) = {
            // SAFETY: len >= HEADER_SIZE was just checked.
            let hdr = unsafe { &*(mmap.as_ptr() as *const ShansHeaderRaw) };
            (hdr.magic, hdr.version)
        };
        if magic != MAGIC || version != VERSION {
            return Err(ShmError::BadMagic { path, found: magic, expected: MAGIC });
        }

        Ok(Self { path, file, mmap: RwLock::new(mmap) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` with a read-locked view of the current mapping. `f` must
    /// not retain any pointer derived from the slice past its own return.
    pub(crate) fn with_mmap<R>(&self, f: impl FnOnce(&MmapMut) -> R) -> R {
        let guard = self.mmap.read().expect("chans mmap lock poisoned");
        f(&guard)
    }

    fn header<'a>(mmap: &'a MmapMut) -> &'a ShansHeaderRaw {
        // SAFETY: every ChansFile maps at least HEADER_SIZE bytes.
        unsafe { &*(mmap.as_ptr() as *const ShansHeaderRaw) }
    }

    /// Offset of the first live `Shan`, or 0 if the list is empty.
    pub fn head(&self) -> u64 {
        self.with_mmap(|m| Self::header(m).head.load(Ordering::Acquire))
    }

    /// Single attempt at CAS-prepending `offset` onto the live-channel
    /// list, assuming the caller has already linked the new `Shan`'s `next`
    /// field to `expected_head`. Returns `Ok(())` on success or
    /// `Err(current_head)` so the caller can relink `next` and retry.
    pub(crate) fn try_cas_head(&self, expected_head: u64, offset: u64) -> Result<(), u64> {
        self.with_mmap(|m| {
            Self::header(m)
                .head
                .compare_exchange(expected_head, offset, Ordering::AcqRel, Ordering::Acquire)
                .map(|_| ())
        })
    }

    /// Bump-allocates `bytes` (aligned) past `alloc_cursor`, growing the
    /// file/mapping first if needed, and returns the offset of the new
    /// region.
    pub(crate) fn alloc(&self, bytes: usize) -> Result<u64, ShmError> {
        let aligned = align_up(bytes, ALIGN);
        loop {
            let (cursor, map_len) = self.with_mmap(|m| (Self::header(m).alloc_cursor.load(Ordering::Relaxed), m.len()));
            let new_cursor = cursor + aligned as u64;
            if new_cursor as usize > map_len {
                self.grow_to(new_cursor as usize)?;
                continue;
            }
            let won = self.with_mmap(|m| {
                Self::header(m).alloc_cursor.compare_exchange(cursor, new_cursor, Ordering::AcqRel, Ordering::Relaxed).is_ok()
            });
            if won {
                return Ok(cursor);
            }
        }
    }

    /// Forcibly unmaps and closes this file, bypassing the normal `Drop`
    /// path. Called only from the process-exit cleanup hook registered in
    /// `shm::register_cleanup`; by the time it runs, nothing else may
    /// touch `self` through a live reference, since the mapping and fd are
    /// gone regardless of how many `Arc<ChansFile>` clones still exist.
    #[cfg(unix)]
    pub(crate) fn force_unmap_and_close(&self) {
        self.with_mmap(|mmap| unsafe {
            libc::munmap(mmap.as_ptr() as *mut libc::c_void, mmap.len());
        });
        unsafe {
            libc::close(self.file.as_raw_fd());
        }
    }

    fn grow_to(&self, need: usize) -> Result<(), ShmError> {
        let new_len = align_up(need, PAGE);
        let mut guard = self.mmap.write().expect("chans mmap lock poisoned");
        if guard.len() >= new_len {
            return Ok(()); // someone else already grew it
        }
        log::debug!("growing {:?} from {} to {} bytes", self.path, guard.len(), new_len);
        self.file.set_len(new_len as u64).map_err(|e| io_err(&self.path, e))?;
        // The remap may return a different address; nothing outside this
        // module (or held across this call) may depend on the old one.
        let new_mmap = unsafe { MmapMut::map_mut(&self.file) }.map_err(|e| io_err(&self.path, e))?;
        *guard = new_mmap;
        Ok(())
    }
}

fn open_create(path: &Path) -> Result<File, ShmError> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path).map_err(|e| io_err(path, e))
}

fn io_err(path: &Path, source: std::io::Error) -> ShmError {
    ShmError::Io { path: path.to_path_buf(), source }
}
