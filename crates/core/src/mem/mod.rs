//! Memory manager.
//!
//! Two-level address mapping with protection plus the pending request buffers
//! that give loads and stores their timing:
//! 1. **Pages and frames:** vaddr → PTE → frame → backing bytes; frames are
//!    4 KiB, the final frame of a mapped image may be partial.
//! 2. **Request buffers:** loads execute after a minimum latency and only when
//!    no pending store overlaps; stores execute at commit-cycle plus latency,
//!    in order, from manager-owned copies of their data.
//! 3. **Alias detection:** two vaddr ranges alias when they project onto any
//!    shared physical byte.

use std::collections::{BTreeMap, HashMap, VecDeque};

use log::{debug, trace};

use crate::common::error::{except_num, pack_except, pf_bits, Exception, MemError};
use crate::config::{LoadReorder, MemConfig, PADDR_LIMIT, PAGE_SIZE, VADDR_LIMIT};

/// Read permission bit.
pub const P_R: u8 = 0x1;
/// Write permission bit.
pub const P_W: u8 = 0x2;
/// Execute permission bit.
pub const P_X: u8 = 0x4;

/// Kernel protection level.
pub const PL_KERNEL: u8 = 0;
/// User protection level.
pub const PL_USER: u8 = 3;

/// Aligned page address bits.
#[inline]
pub const fn page_floor(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

/// Page offset bits.
#[inline]
pub const fn page_offs(addr: u64) -> u64 {
    addr & (PAGE_SIZE - 1)
}

/// Mode of a memory reference. `Invalid` doubles as "no reference" and as the
/// marker a committing store leaves on a misspeculated load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemRefMode {
    /// No memory reference, or an invalidated load.
    #[default]
    Invalid,
    /// Data read.
    Read,
    /// Data write.
    Write,
    /// Branch target.
    Branch,
    /// RIP-relative reference.
    Rel,
}

impl MemRefMode {
    /// One-character mode tag for logs.
    pub fn tag(self) -> &'static str {
        match self {
            MemRefMode::Invalid => "0",
            MemRefMode::Read => "r",
            MemRefMode::Write => "w",
            MemRefMode::Branch => "b",
            MemRefMode::Rel => "+",
        }
    }
}

/// Progress of a memory reference through its request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemRefState {
    /// Not ready.
    #[default]
    Unavail,
    /// Address resolved, ready for execution.
    ExReady,
    /// Submitted to the memory manager.
    InExec,
    /// Request completed, value available.
    ValReady,
}

/// Load/store metadata attached to a ROB entry.
#[derive(Debug, Clone, Default)]
pub struct MemRef {
    /// Virtual address to access. Branches carry the resolved target here.
    pub vaddr: u64,
    /// Access size in bytes; `u64::MAX` on a branch encodes "not taken".
    pub size: u64,
    /// Reference mode.
    pub mode: MemRefMode,
    /// Request progress.
    pub ready: MemRefState,
    /// Owned data buffer (store data, filled at execution).
    pub data: Vec<u8>,
    /// Outstanding load request id, when submitted.
    pub req: Option<u64>,
}

/// A mapped page frame and its backing bytes.
#[derive(Debug)]
pub struct PageFrame {
    /// Backing bytes; `len()` is the usable size and may be under a full page.
    pub data: Vec<u8>,
    /// Protection level of the frame.
    pub pl: u8,
    /// Permitted access kinds.
    pub rwx: u8,
    /// Frame was mapped from an external image rather than zero-filled.
    pub ext: bool,
    /// Frame description (section name).
    pub name: String,
}

impl PageFrame {
    /// Usable bytes in this frame.
    #[inline]
    pub fn bytes_used(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A page table entry.
#[derive(Debug, Clone, Copy)]
pub struct PageTableEntry {
    /// Physical frame base address.
    pub frame: u64,
    /// Present bit.
    pub present: bool,
    /// Protection level of the page.
    pub pl: u8,
    /// Permitted access kinds.
    pub rwx: u8,
}

struct PendingLoad {
    id: u64,
    vaddr: u64,
    size: u64,
    cycle: u64,
}

struct PendingStore {
    vaddr: u64,
    size: u64,
    data: Vec<u8>,
    cycle: u64,
}

/// The memory manager: page and frame maps plus the pending request buffers.
pub struct MemoryManager {
    pagetable: BTreeMap<u64, PageTableEntry>,
    frames: BTreeMap<u64, PageFrame>,
    ldbuf: VecDeque<PendingLoad>,
    completed: HashMap<u64, Vec<u8>>,
    stbuf: VecDeque<PendingStore>,
    next_req: u64,
    ring: u8,
    ld_latency: u64,
    st_latency: u64,
    reorder: LoadReorder,
}

impl MemoryManager {
    /// Creates a manager running at the given protection ring.
    pub fn new(config: &MemConfig, ring: u8) -> Self {
        debug!("MMU_:   initialized, page size {} bytes", PAGE_SIZE);
        Self {
            pagetable: BTreeMap::new(),
            frames: BTreeMap::new(),
            ldbuf: VecDeque::new(),
            completed: HashMap::new(),
            stbuf: VecDeque::new(),
            next_req: 1,
            ring,
            ld_latency: config.ld_latency,
            st_latency: config.st_latency,
            reorder: config.load_reorder,
        }
    }

    /// Maps a zero-initialized page frame at `paddr`.
    pub fn map_frame(&mut self, paddr: u64, pl: u8, rwx: u8, name: &str) -> Result<(), MemError> {
        if paddr > PADDR_LIMIT || paddr % PAGE_SIZE != 0 {
            return Err(MemError::InvalidPageAddr);
        }
        if self.frames.contains_key(&paddr) {
            return Err(MemError::AlreadyMapped);
        }
        self.frames.insert(
            paddr,
            PageFrame {
                data: vec![0; PAGE_SIZE as usize],
                pl,
                rwx,
                ext: false,
                name: name.to_string(),
            },
        );
        debug!("MMU_:   mapped frame p.{paddr:016x} '{name}'");
        Ok(())
    }

    /// Unmaps the frame at `paddr`.
    pub fn unmap_frame(&mut self, paddr: u64) -> Result<(), MemError> {
        if paddr > PADDR_LIMIT || paddr % PAGE_SIZE != 0 {
            return Err(MemError::InvalidPageAddr);
        }
        self.frames
            .remove(&paddr)
            .map(|_| debug!("MMU_:   unmapped frame p.{paddr:016x}"))
            .ok_or(MemError::PageNotMapped)
    }

    /// Maps consecutive frames holding a copy of `image` starting at `paddr`.
    /// The final frame may be partial; its usable size gates later accesses.
    /// Returns the frame base addresses.
    pub fn mmap_frames(
        &mut self,
        paddr: u64,
        image: &[u8],
        pl: u8,
        rwx: u8,
        name: &str,
    ) -> Result<Vec<u64>, MemError> {
        if paddr > PADDR_LIMIT || paddr % PAGE_SIZE != 0 {
            return Err(MemError::InvalidPageAddr);
        }
        if self.frames.contains_key(&paddr) {
            return Err(MemError::AlreadyMapped);
        }
        debug!(
            "MMU_:   mapping {} bytes across {} frames at p.{paddr:016x}",
            image.len(),
            image.len().div_ceil(PAGE_SIZE as usize)
        );

        let mut mapped = Vec::new();
        let mut cur = paddr;
        for chunk in image.chunks(PAGE_SIZE as usize) {
            self.frames.insert(
                cur,
                PageFrame {
                    data: chunk.to_vec(),
                    pl,
                    rwx,
                    ext: true,
                    name: name.to_string(),
                },
            );
            debug!("MMU_:   mapped frame '{name}' p.{cur:016x}");
            mapped.push(cur);
            cur += PAGE_SIZE;
        }
        Ok(mapped)
    }

    /// Releases every frame and its backing bytes.
    pub fn unmap_all_frames(&mut self) {
        self.frames.clear();
        debug!("MMU_:   memory cleared");
    }

    /// Installs a page table entry for `vaddr`.
    pub fn map_page(
        &mut self,
        vaddr: u64,
        paddr: u64,
        present: bool,
        pl: u8,
        rwx: u8,
    ) -> Result<(), MemError> {
        if vaddr > VADDR_LIMIT || vaddr % PAGE_SIZE != 0 {
            return Err(MemError::InvalidPageAddr);
        }
        if self.pagetable.contains_key(&vaddr) {
            return Err(MemError::AlreadyMapped);
        }
        self.pagetable.insert(
            vaddr,
            PageTableEntry {
                frame: paddr,
                present,
                pl,
                rwx,
            },
        );
        debug!("MMU_:   mapped page v.{vaddr:016x} -> p.{paddr:016x}");
        Ok(())
    }

    /// Removes the page table entry for `vaddr`.
    pub fn unmap_page(&mut self, vaddr: u64) -> Result<(), MemError> {
        if vaddr > VADDR_LIMIT || vaddr % PAGE_SIZE != 0 {
            return Err(MemError::InvalidPageAddr);
        }
        self.pagetable
            .remove(&vaddr)
            .map(|_| debug!("MMU_:   unmapped page v.{vaddr:016x}"))
            .ok_or(MemError::PageNotMapped)
    }

    /// Removes every page table entry.
    pub fn unmap_all_pages(&mut self) {
        self.pagetable.clear();
        debug!("MMU_:   page table cleared");
    }

    /// Translates a virtual address, checking access kind and ring.
    pub fn translate(&self, vaddr: u64, rwx: u8) -> Result<u64, MemError> {
        let pte = self
            .pagetable
            .get(&page_floor(vaddr))
            .ok_or(MemError::PageNotMapped)?;
        if rwx & pte.rwx == 0 {
            return Err(MemError::AccessViolation);
        }
        if self.ring > pte.pl {
            return Err(MemError::ProtectionViolation);
        }
        Ok(pte.frame | page_offs(vaddr))
    }

    fn frame_at(&self, paddr: u64, rwx: u8) -> Result<&PageFrame, MemError> {
        let frame = self
            .frames
            .get(&page_floor(paddr))
            .ok_or(MemError::InvalidAddr)?;
        if page_offs(paddr) >= frame.bytes_used() {
            return Err(MemError::InvalidAddr);
        }
        if rwx & frame.rwx == 0 {
            return Err(MemError::AccessViolation);
        }
        if self.ring > frame.pl {
            return Err(MemError::ProtectionViolation);
        }
        Ok(frame)
    }

    /// Reads from `vaddr` into `buf`, iterating frame by frame. A partial
    /// final frame ends the walk with a short count, not an error. Returns
    /// `(latency, bytes_read)`.
    pub fn read(&self, vaddr: u64, buf: &mut [u8], rwx: u8) -> Result<(u64, u64), MemError> {
        trace!("MMU_:   reading {} bytes from v.{vaddr:016x}", buf.len());
        if vaddr > VADDR_LIMIT {
            return Err(MemError::InvalidPageAddr);
        }
        if !self.pagetable.contains_key(&page_floor(vaddr)) {
            return Err(MemError::PageNotMapped);
        }

        let mut off = 0u64;
        let len = buf.len() as u64;
        while off < len {
            let pa = self.translate(vaddr + off, rwx)?;
            let frame = self.frame_at(pa, rwx)?;
            let foff = page_offs(pa);
            let avail = frame.bytes_used() - foff;
            let n = avail.min(len - off);
            buf[off as usize..(off + n) as usize]
                .copy_from_slice(&frame.data[foff as usize..(foff + n) as usize]);
            off += n;
            if off < len && frame.bytes_used() < PAGE_SIZE {
                trace!("MMU_:   end of mapped region reached");
                break;
            }
        }
        trace!("MMU_:   read {off} bytes");
        Ok((self.ld_latency, off))
    }

    /// Writes `data` at `vaddr`, iterating frame by frame. A partial final
    /// frame ends the walk silently.
    pub fn write(&mut self, vaddr: u64, data: &[u8]) -> Result<(), MemError> {
        trace!("MMU_:   writing {} bytes to v.{vaddr:016x}", data.len());
        if vaddr > VADDR_LIMIT {
            return Err(MemError::InvalidPageAddr);
        }
        if !self.pagetable.contains_key(&page_floor(vaddr)) {
            return Err(MemError::PageNotMapped);
        }

        let mut off = 0u64;
        let len = data.len() as u64;
        while off < len {
            let pa = self.translate(vaddr + off, P_W)?;
            self.frame_at(pa, P_W)?;
            let frame = self.frames.get_mut(&page_floor(pa)).unwrap();
            let foff = page_offs(pa);
            let avail = frame.bytes_used() - foff;
            let n = avail.min(len - off);
            frame.data[foff as usize..(foff + n) as usize]
                .copy_from_slice(&data[off as usize..(off + n) as usize]);
            let partial = frame.bytes_used() < PAGE_SIZE;
            off += n;
            if off < len && partial {
                trace!("MMU_:   end of mapped region reached");
                break;
            }
        }
        Ok(())
    }

    /// True if any pending store overlaps `[vaddr, vaddr + len)`.
    pub fn is_busy(&self, vaddr: u64, len: u64) -> bool {
        self.stbuf
            .iter()
            .any(|s| self.is_alias(vaddr, len, s.vaddr, s.size))
    }

    /// Physical byte segments a virtual range projects onto; unmapped pages
    /// contribute nothing.
    fn phys_segments(&self, vaddr: u64, len: u64) -> Vec<(u64, u64)> {
        let mut segs = Vec::new();
        let mut off = 0u64;
        while off < len {
            let va = vaddr.wrapping_add(off);
            let in_page = PAGE_SIZE - page_offs(va);
            let n = in_page.min(len - off);
            if let Some(pte) = self.pagetable.get(&page_floor(va)) {
                segs.push((pte.frame | page_offs(va), n));
            }
            off += n;
        }
        segs
    }

    /// True if two virtual ranges project onto any shared physical byte.
    /// Ranges on the same virtual page compare by offsets; otherwise both are
    /// projected page by page. Unmapped pages never alias.
    pub fn is_alias(&self, vaddr1: u64, len1: u64, vaddr2: u64, len2: u64) -> bool {
        if len1 == 0 || len2 == 0 {
            return false;
        }
        let (va, la, vb, lb) = if vaddr1 <= vaddr2 {
            (vaddr1, len1, vaddr2, len2)
        } else {
            (vaddr2, len2, vaddr1, len1)
        };

        // same page? check this first due to locality
        if page_floor(va) == page_floor(vb) {
            return va.wrapping_add(la) > vb;
        }

        let sa = self.phys_segments(va, la);
        let sb = self.phys_segments(vb, lb);
        for (pa, na) in &sa {
            for (pb, nb) in &sb {
                if pa < &(pb + nb) && pb < &(pa + na) {
                    return true;
                }
            }
        }
        false
    }

    fn pf_word(&self, present: bool, extra: u16) -> u32 {
        let mut code = extra;
        if present {
            code |= pf_bits::PRESENT;
        }
        if self.ring == PL_USER {
            code |= pf_bits::USER;
        }
        pack_except(Exception::Pf, code)
    }

    fn range_mapped(&self, vaddr: u64, size: u64) -> bool {
        let last = vaddr.wrapping_add(size.saturating_sub(1));
        self.pagetable.contains_key(&page_floor(vaddr))
            && self.pagetable.contains_key(&page_floor(last))
    }

    fn bad_pl(&self, vaddr: u64, size: u64) -> bool {
        let first = self.pagetable.get(&page_floor(vaddr));
        let last = self
            .pagetable
            .get(&page_floor(vaddr.wrapping_add(size.saturating_sub(1))));
        match (first, last) {
            (Some(a), Some(b)) => self.ring > a.pl || self.ring > b.pl,
            _ => true,
        }
    }

    fn bad_rwx(&self, vaddr: u64, size: u64, rwx: u8) -> bool {
        let first = self.pagetable.get(&page_floor(vaddr));
        let last = self
            .pagetable
            .get(&page_floor(vaddr.wrapping_add(size.saturating_sub(1))));
        match (first, last) {
            (Some(a), Some(b)) => rwx & a.rwx == 0 || rwx & b.rwx == 0,
            _ => true,
        }
    }

    /// Validates and enqueues a load request. On success returns the request
    /// id and the data arrives after the load latency; on failure returns the
    /// packed page-fault word for the caller's exception slot.
    pub fn request_load(&mut self, now: u64, vaddr: u64, size: u64, rx: u8) -> Result<u64, u32> {
        let present = self.range_mapped(vaddr, size);
        if !present || self.bad_pl(vaddr, size) || self.bad_rwx(vaddr, size, rx) {
            debug!("MMU_:   load from v.{vaddr:016x} ({size} bytes) will fault");
            let ifetch = if rx == P_X { pf_bits::IFETCH } else { 0 };
            return Err(self.pf_word(present, ifetch));
        }
        let id = self.next_req;
        self.next_req += 1;
        self.ldbuf.push_back(PendingLoad {
            id,
            vaddr,
            size,
            cycle: now + self.ld_latency,
        });
        debug!(
            "MMU_:   load from v.{vaddr:016x} requested, latency {} cycle(s)",
            self.ld_latency
        );
        Ok(id)
    }

    /// Takes the completed data of a load request, if it has executed.
    pub fn poll_load(&mut self, id: u64) -> Option<Vec<u8>> {
        self.completed.remove(&id)
    }

    /// Validates and enqueues a store request. The data is copied into a
    /// manager-owned buffer; the producing register may be reclaimed freely.
    /// On failure returns the packed page-fault word.
    pub fn request_store(&mut self, now: u64, vaddr: u64, data: &[u8]) -> Result<(), u32> {
        let size = data.len() as u64;
        let present = self.range_mapped(vaddr, size);
        if !present || self.bad_pl(vaddr, size) || self.bad_rwx(vaddr, size, P_W) {
            debug!("MMU_:   store to v.{vaddr:016x} ({size} bytes) will fault");
            return Err(self.pf_word(present, pf_bits::WRITE));
        }
        // the core views this store as committed, it must not fault later
        self.stbuf.push_back(PendingStore {
            vaddr,
            size,
            data: data.to_vec(),
            cycle: now + self.st_latency,
        });
        debug!(
            "MMU_:   store to v.{vaddr:016x} requested, latency {} cycle(s)",
            self.st_latency
        );
        Ok(())
    }

    /// Executes pending requests whose cycle has been reached. Stores drain
    /// strictly in order; a load behind an overlapping pending store defers,
    /// and the reorder policy decides whether independent younger loads may
    /// pass it.
    pub fn refresh(&mut self, now: u64) -> Result<(), MemError> {
        while let Some(front) = self.stbuf.front() {
            if now < front.cycle {
                break;
            }
            let s = self.stbuf.pop_front().unwrap();
            trace!("MMU_:   executing store to v.{:016x}", s.vaddr);
            self.write(s.vaddr, &s.data)?;
        }

        let mut due = Vec::new();
        for (i, pl) in self.ldbuf.iter().enumerate() {
            if now < pl.cycle || self.is_busy(pl.vaddr, pl.size) {
                match self.reorder {
                    LoadReorder::Relaxed => continue,
                    LoadReorder::Strict => break,
                }
            }
            due.push(i);
        }
        for &i in due.iter().rev() {
            let pl = self.ldbuf.remove(i).unwrap();
            let mut buf = vec![0u8; pl.size as usize];
            self.read(pl.vaddr, &mut buf, P_R)?;
            trace!("MMU_:   executed load from v.{:016x}", pl.vaddr);
            self.completed.insert(pl.id, buf);
        }
        Ok(())
    }

    /// Discards outstanding load requests. The store buffer survives; its
    /// requests are already committed and must reach memory.
    pub fn clear_load_buffer(&mut self) {
        self.ldbuf.clear();
        self.completed.clear();
    }

    /// True while committed stores are still waiting to drain.
    pub fn is_active(&self) -> bool {
        !self.stbuf.is_empty()
    }

    /// Exception number helper for callers logging fault words.
    pub fn fault_name(word: u32) -> &'static str {
        Exception::from_num(except_num(word)).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::except_code;
    use crate::config::MemConfig;

    fn mm() -> MemoryManager {
        MemoryManager::new(&MemConfig::default(), PL_USER)
    }

    fn map_rw(m: &mut MemoryManager, vaddr: u64, len: usize) {
        let image = vec![0u8; len];
        let frames = m
            .mmap_frames(vaddr, &image, PL_USER, P_R | P_W, ".data")
            .unwrap();
        for f in frames {
            m.map_page(f, f, true, PL_USER, P_R | P_W).unwrap();
        }
    }

    #[test]
    fn test_map_and_translate() {
        let mut m = mm();
        m.map_frame(0x2000, PL_USER, P_R | P_W, "t").unwrap();
        m.map_page(0x8000, 0x2000, true, PL_USER, P_R | P_W).unwrap();
        assert_eq!(m.translate(0x8010, P_R).unwrap(), 0x2010);
        assert_eq!(m.translate(0x9000, P_R), Err(MemError::PageNotMapped));
        assert_eq!(m.translate(0x8000, P_X), Err(MemError::AccessViolation));
    }

    #[test]
    fn test_protection_level() {
        let mut m = mm();
        m.map_frame(0x2000, PL_KERNEL, P_R | P_W, "k").unwrap();
        m.map_page(0x8000, 0x2000, true, PL_KERNEL, P_R | P_W).unwrap();
        assert_eq!(m.translate(0x8000, P_R), Err(MemError::ProtectionViolation));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let mut m = mm();
        map_rw(&mut m, 0x8000, 0x2000);
        let data = [0xde, 0xad, 0xbe, 0xef];
        m.write(0x8ffc, &data).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(m.read(0x8ffc, &mut buf, P_R).unwrap().1, 4);
        assert_eq!(buf, data);
    }

    #[test]
    fn test_cross_page_access() {
        let mut m = mm();
        map_rw(&mut m, 0x8000, 0x2000);
        let data: Vec<u8> = (0..16).collect();
        m.write(0x8ff8, &data).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(m.read(0x8ff8, &mut buf, P_R).unwrap().1, 16);
        assert_eq!(&buf[..], &data[..]);
    }

    #[test]
    fn test_partial_frame_short_read() {
        let mut m = mm();
        let image = vec![0xabu8; 24]; // one partial frame
        let frames = m.mmap_frames(0x8000, &image, PL_USER, P_R, ".text").unwrap();
        assert_eq!(frames.len(), 1);
        m.map_page(0x8000, 0x8000, true, PL_USER, P_R).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(m.read(0x8010, &mut buf, P_R).unwrap().1, 8);
        assert_eq!(m.read(0x8018, &mut buf, P_R), Err(MemError::InvalidAddr));
    }

    #[test]
    fn test_alias_same_page() {
        let mut m = mm();
        map_rw(&mut m, 0x8000, 0x1000);
        assert!(m.is_alias(0x8000, 8, 0x8004, 8));
        assert!(!m.is_alias(0x8000, 4, 0x8004, 8));
        assert!(m.is_alias(0x8004, 8, 0x8000, 8));
    }

    #[test]
    fn test_alias_cross_page_projection() {
        let mut m = mm();
        m.map_frame(0x2000, PL_USER, P_R | P_W, "t").unwrap();
        // two virtual pages onto the same frame
        m.map_page(0x8000, 0x2000, true, PL_USER, P_R | P_W).unwrap();
        m.map_page(0xa000, 0x2000, true, PL_USER, P_R | P_W).unwrap();
        assert!(m.is_alias(0x8010, 8, 0xa010, 8));
        assert!(!m.is_alias(0x8010, 8, 0xa020, 8));
        // unmapped ranges never alias
        assert!(!m.is_alias(0x8010, 8, 0xc010, 8));
    }

    #[test]
    fn test_store_latency_and_busy() {
        let mut m = MemoryManager::new(
            &MemConfig {
                st_latency: 2,
                ..Default::default()
            },
            PL_USER,
        );
        map_rw(&mut m, 0x8000, 0x1000);
        m.request_store(10, 0x8000, &[1, 2, 3, 4]).unwrap();
        assert!(m.is_busy(0x8002, 4));
        assert!(!m.is_busy(0x8004, 4));
        assert!(m.is_active());

        m.refresh(11).unwrap();
        assert!(m.is_active()); // not due yet
        m.refresh(12).unwrap();
        assert!(!m.is_active());
        let mut buf = [0u8; 4];
        m.read(0x8000, &mut buf, P_R).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_load_defers_behind_store() {
        let mut m = mm();
        map_rw(&mut m, 0x8000, 0x1000);
        m.write(0x8000, &[9, 9, 9, 9]).unwrap();
        m.request_store(5, 0x8000, &[1, 1, 1, 1]).unwrap();
        let id = m.request_load(4, 0x8000, 4, P_R).unwrap();

        // at cycle 4 the store is pending and the load range is busy
        m.refresh(4).unwrap();
        assert!(m.poll_load(id).is_none());

        // at cycle 5 the store drains first, then the load may execute
        m.refresh(5).unwrap();
        assert_eq!(m.poll_load(id).unwrap(), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_relaxed_reorder_passes_independent_load() {
        let mut m = mm();
        map_rw(&mut m, 0x8000, 0x1000);
        m.write(0x8100, &[7, 7, 7, 7]).unwrap();
        m.request_store(10, 0x8000, &[1, 1, 1, 1]).unwrap();
        let blocked = m.request_load(0, 0x8000, 4, P_R).unwrap();
        let free = m.request_load(0, 0x8100, 4, P_R).unwrap();

        m.refresh(1).unwrap();
        assert!(m.poll_load(blocked).is_none());
        assert_eq!(m.poll_load(free).unwrap(), vec![7, 7, 7, 7]);
    }

    #[test]
    fn test_load_fault_word() {
        let mut m = mm();
        let err = m.request_load(0, 0xdead_0000, 8, P_R).unwrap_err();
        assert_eq!(except_num(err), Exception::Pf as u16);
        assert_eq!(except_code(err) & pf_bits::PRESENT, 0);
    }

    #[test]
    fn test_store_fault_sets_write_bit() {
        let mut m = mm();
        let image = vec![0u8; 16];
        let frames = m.mmap_frames(0x8000, &image, PL_USER, P_R, ".ro").unwrap();
        for f in frames {
            m.map_page(f, f, true, PL_USER, P_R).unwrap();
        }
        let err = m.request_store(0, 0x8000, &[1]).unwrap_err();
        assert_eq!(except_num(err), Exception::Pf as u16);
        let code = except_code(err);
        assert_ne!(code & pf_bits::WRITE, 0);
        assert_ne!(code & pf_bits::PRESENT, 0);
    }
}
