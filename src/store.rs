//! Paged file store: a single backing file addressed as fixed-size pages, with a bounded page
//! cache in front of it and an optional memory-mapped read/write path.
#![allow(unsafe_code)]

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::extent::{Extent, first_page_of};
use crate::page::{HEADER_VERSION, Header, PAGE_SIZE, Page};
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Options controlling how a [`PagedStore`] opens its backing file.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    pub path: PathBuf,
    pub cache_capacity: usize,
    pub memory_mapped: bool,
    pub extent_cache: bool,
}

impl OpenOptions {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut path = path.into();
        if path.extension().is_none() {
            path.set_extension("mde");
        }
        Self { path, cache_capacity: 100, memory_mapped: false, extent_cache: true }
    }

    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_memory_mapped(mut self, enabled: bool) -> Self {
        self.memory_mapped = enabled;
        self
    }

    #[must_use]
    pub fn with_extent_cache(mut self, enabled: bool) -> Self {
        self.extent_cache = enabled;
        self
    }
}

enum Backing {
    File(File),
    Mapped { file: File, mmap: memmap2::MmapMut },
}

/// The paged file store. Pages flow through a bounded LRU [`Cache`] before touching disk; writes
/// go through the cache too so a burst of small writes coalesces into one dirty page instead of
/// one `pwrite` each.
///
/// `extent_cache`, when enabled, additionally caches whole 8-page groups for callers that address
/// storage at extent granularity; it is independent of the page cache (an extent read does not
/// populate the page cache and vice versa), matching the "two caches for two addressing units"
/// shape in the spec rather than layering one atop the other.
pub struct PagedStore {
    backing: RwLock<Backing>,
    cache: Cache<Page>,
    extent_cache: Option<Cache<Extent>>,
    path: PathBuf,
}

impl PagedStore {
    /// Opens an existing store or creates a new one with a fresh header page.
    pub fn open(options: OpenOptions) -> Result<Self> {
        let path = options.path.clone();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(Error::NotFound(path.display().to_string()));
            }
        }
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| map_open_err(e, &path))?;

        let is_new = file.metadata()?.len() == 0;
        if is_new {
            let header = Header::fresh();
            let page = header.to_page();
            file.seek(SeekFrom::Start(0))?;
            file.write_all(page.bytes.as_ref())?;
            file.sync_all()?;
        } else {
            let mut buf = [0u8; PAGE_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            let page = Page::from_bytes(0, buf);
            Header::from_page(&page)?;
        }

        let backing = if options.memory_mapped {
            let len = file.metadata()?.len().max(PAGE_SIZE as u64);
            file.set_len(len)?;
            // Safety note (doc-only, no `unsafe impl`): the mapping is exclusive to this process
            // for the lifetime of the store; callers must not open the same file read-write
            // elsewhere while mapped.
            let mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };
            Backing::Mapped { file, mmap }
        } else {
            Backing::File(file)
        };

        log::info!("opened store at {} (mmap={})", path.display(), options.memory_mapped);
        Ok(Self {
            backing: RwLock::new(backing),
            cache: Cache::new(options.cache_capacity),
            extent_cache: options.extent_cache.then(|| Cache::new(options.cache_capacity)),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the page at `id`, serving from cache on hit.
    pub fn read_page(&self, id: u32) -> Result<Page> {
        if let Some(page) = self.cache.get(id) {
            log::trace!("page {id} cache hit");
            return Ok(page);
        }
        log::trace!("page {id} cache miss");
        let page = self.read_page_from_disk(id)?;
        if let Some((evicted_id, evicted)) = self.cache.put(id, page.clone()) {
            self.write_page_to_disk(&evicted)?;
            log::debug!("wrote back evicted dirty page {evicted_id}");
        }
        Ok(page)
    }

    fn read_page_from_disk(&self, id: u32) -> Result<Page> {
        let offset = u64::from(id) * PAGE_SIZE as u64;
        let mut backing = self.backing.write();
        match &mut *backing {
            Backing::File(file) => {
                let mut buf = [0u8; PAGE_SIZE];
                let len = file.metadata()?.len();
                if offset >= len {
                    return Ok(Page::zeroed(id));
                }
                file.seek(SeekFrom::Start(offset))?;
                let read = read_best_effort(file, &mut buf)?;
                if read < PAGE_SIZE {
                    buf[read..].fill(0);
                }
                Ok(Page::from_bytes(id, buf))
            }
            Backing::Mapped { mmap, .. } => {
                let offset = crate::utils::num::u64_to_usize(offset).unwrap_or(usize::MAX);
                if offset + PAGE_SIZE > mmap.len() {
                    return Ok(Page::zeroed(id));
                }
                let mut buf = [0u8; PAGE_SIZE];
                buf.copy_from_slice(&mmap[offset..offset + PAGE_SIZE]);
                Ok(Page::from_bytes(id, buf))
            }
        }
    }

    /// Marks `page` dirty, installs it in the cache, and writes it through immediately.
    pub fn write_page(&self, mut page: Page) -> Result<()> {
        page.mark_dirty();
        self.write_page_to_disk(&page)?;
        page.dirty = false;
        if let Some((evicted_id, evicted)) = self.cache.put(page.page_id, page) {
            self.write_page_to_disk(&evicted)?;
            log::debug!("wrote back evicted dirty page {evicted_id}");
        }
        Ok(())
    }

    fn write_page_to_disk(&self, page: &Page) -> Result<()> {
        let offset = u64::from(page.page_id) * PAGE_SIZE as u64;
        let mut backing = self.backing.write();
        match &mut *backing {
            Backing::File(file) => {
                let needed = offset + PAGE_SIZE as u64;
                if file.metadata()?.len() < needed {
                    file.set_len(needed)?;
                }
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(page.bytes.as_ref())?;
            }
            Backing::Mapped { file, mmap } => {
                let offset = crate::utils::num::u64_to_usize(offset).unwrap_or(usize::MAX);
                let needed = offset + PAGE_SIZE;
                if needed > mmap.len() {
                    file.set_len(needed as u64)?;
                    *mmap = unsafe { memmap2::MmapMut::map_mut(&*file)? };
                }
                mmap[offset..offset + PAGE_SIZE].copy_from_slice(page.bytes.as_ref());
            }
        }
        Ok(())
    }

    /// Consumes the header's monotonic allocation cursor and returns the id just consumed. Purely
    /// monotonic: there is no free-page reclamation (see the naive-allocation non-goal).
    pub fn allocate_page(&self) -> Result<u32> {
        let mut header = self.read_header()?;
        let allocated = header.next_page_id;
        header.next_page_id += 1;
        self.write_header(header)?;
        log::debug!("allocated page {allocated} from cursor");
        Ok(allocated)
    }

    fn read_header(&self) -> Result<Header> {
        Header::from_page(&self.read_page(0)?)
    }

    fn write_header(&self, header: Header) -> Result<()> {
        self.write_page(header.to_page())
    }

    /// Reads all 8 pages of the extent `eid`, serving from the extent cache on hit. Pages past EOF
    /// come back zero-filled and clean, same as [`read_page`](Self::read_page).
    pub fn read_extent(&self, eid: u32) -> Result<Extent> {
        if let Some(cache) = &self.extent_cache {
            if let Some(extent) = cache.get(eid) {
                log::trace!("extent {eid} cache hit");
                return Ok(extent);
            }
        }
        log::trace!("extent {eid} cache miss");
        let base = first_page_of(eid);
        let mut extent = Extent::zeroed(eid);
        for (i, page) in extent.pages.iter_mut().enumerate() {
            *page = self.read_page_from_disk(base + i as u32)?;
        }
        if let Some(cache) = &self.extent_cache {
            if let Some((evicted_id, evicted)) = cache.put(eid, extent.clone()) {
                self.write_extent_to_disk(&evicted)?;
                log::debug!("wrote back evicted dirty extent {evicted_id}");
            }
        }
        Ok(extent)
    }

    /// Writes every dirty page of `extent` through individually, clears their dirty flags, and
    /// installs the clean extent in the extent cache (if enabled).
    pub fn write_extent(&self, mut extent: Extent) -> Result<()> {
        self.write_extent_to_disk(&extent)?;
        for page in &mut extent.pages {
            page.dirty = false;
        }
        if let Some(cache) = &self.extent_cache {
            if let Some((evicted_id, evicted)) = cache.put(extent.extent_id, extent) {
                self.write_extent_to_disk(&evicted)?;
                log::debug!("wrote back evicted dirty extent {evicted_id}");
            }
        }
        Ok(())
    }

    fn write_extent_to_disk(&self, extent: &Extent) -> Result<()> {
        for page in &extent.pages {
            if page.dirty {
                self.write_page_to_disk(page)?;
            }
        }
        Ok(())
    }

    /// Writes every dirty cached page (and, if enabled, every dirty cached extent) through to
    /// disk and durably syncs.
    pub fn flush(&self) -> Result<()> {
        for id in self.cache.dirty_ids() {
            if let Some(mut page) = self.cache.get(id) {
                if page.dirty {
                    self.write_page_to_disk(&page)?;
                    page.dirty = false;
                    let _ = self.cache.put(id, page);
                }
            }
        }
        if let Some(cache) = &self.extent_cache {
            for eid in cache.dirty_ids() {
                if let Some(mut extent) = cache.get(eid) {
                    if extent.is_dirty() {
                        self.write_extent_to_disk(&extent)?;
                        for page in &mut extent.pages {
                            page.dirty = false;
                        }
                        let _ = cache.put(eid, extent);
                    }
                }
            }
        }
        let mut backing = self.backing.write();
        match &mut *backing {
            Backing::File(file) => file.sync_all()?,
            Backing::Mapped { file, mmap } => {
                mmap.flush()?;
                file.sync_all()?;
            }
        }
        log::info!("flushed store at {}", self.path.display());
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.flush()
    }
}

fn read_best_effort(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

fn map_open_err(e: std::io::Error, path: &Path) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.display().to_string()),
        _ => Error::Io(e),
    }
}
