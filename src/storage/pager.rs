//! Maps a single on-disk file to a bounded set of in-memory pages.
//!
//! Pages are loaded lazily on first touch and kept cached for the whole
//! session; there is no eviction. A split can have several pages pinned
//! at once (old node, new node, parent, grandparent, child being moved),
//! so returned page handles must stay valid even while other pages are
//! being fetched or grown into existence — that's what the `Arc<Mutex<_>>`
//! buys us over a plain owned `Vec<Node>`.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::errors::Error;
use crate::storage::btree::Node;

pub const PAGE_SIZE: usize = 4096;
pub const MAX_PAGES: usize = 400;

pub type PageHandle = Arc<Mutex<Node>>;

pub struct Pager {
    file: File,
    file_length: u64,
    num_pages: u32,
    pages: heapless::Vec<Option<PageHandle>, MAX_PAGES>,
}

impl Pager {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;
        let file_length = file.metadata()?.len();

        if file_length % PAGE_SIZE as u64 != 0 {
            return Err(Error::Corrupt(
                "Db file is not a whole number of pages. Corrupt file.".into(),
            ));
        }

        let num_pages = (file_length / PAGE_SIZE as u64) as u32;
        debug!(num_pages, file_length, "opened pager");

        let mut pages: heapless::Vec<Option<PageHandle>, MAX_PAGES> = heapless::Vec::new();
        for _ in 0..MAX_PAGES {
            let _ = pages.push(None);
        }

        Ok(Pager {
            file,
            file_length,
            num_pages,
            pages,
        })
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Returns a handle to `page_num`, loading it from disk on first touch.
    /// A page beyond the current file length is returned zeroed; growth of
    /// `num_pages` happens here, not on flush.
    pub fn get(&mut self, page_num: u32) -> Result<PageHandle, Error> {
        if page_num as usize >= MAX_PAGES {
            return Err(Error::Corrupt(format!(
                "page number {page_num} out of bounds ({MAX_PAGES} max)"
            )));
        }

        if self.pages[page_num as usize].is_none() {
            let mut buf = [0u8; PAGE_SIZE];
            let pages_on_disk = (self.file_length as usize + PAGE_SIZE - 1) / PAGE_SIZE;
            if (page_num as usize) < pages_on_disk {
                self.file
                    .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
                self.file.read_exact(&mut buf)?;
                trace!(page_num, "loaded page from disk");
            }
            self.pages[page_num as usize] = Some(Arc::new(Mutex::new(Node::from_bytes(buf))));
            if page_num >= self.num_pages {
                self.num_pages = page_num + 1;
            }
        }

        Ok(self.pages[page_num as usize].as_ref().unwrap().clone())
    }

    /// Allocates the next unused page number. Does not touch the cache;
    /// the caller fetches it with `get` once it wants to initialize it.
    pub fn get_unused_page_num(&self) -> u32 {
        self.num_pages
    }

    fn flush(&mut self, page_num: u32) -> Result<(), Error> {
        let Some(handle) = self.pages[page_num as usize].clone() else {
            return Err(Error::Corrupt(format!(
                "attempted to flush page {page_num} which was never loaded"
            )));
        };
        let node = handle
            .lock()
            .map_err(|e| Error::LockPoisoned(e.to_string()))?;
        self.file
            .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(&node.data)?;
        Ok(())
    }

    /// Flushes every loaded page and the underlying file handle.
    pub fn close(&mut self) -> Result<(), Error> {
        for page_num in 0..self.num_pages {
            if self.pages[page_num as usize].is_some() {
                self.flush(page_num)?;
            }
        }
        self.file.flush()?;
        Ok(())
    }
}
