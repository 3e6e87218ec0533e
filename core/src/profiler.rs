use heaptrail_util::FastHashMap;
use tracing::trace;

use crate::block::{Block, SiteId, Timestamp};
use crate::config::HeapProfilerConfig;
use crate::index::BlockIndex;
use crate::report::HeapReport;
use crate::site::SiteStats;

/// Raw storage boundary to the host instrumentation framework.
///
/// This is the host's own allocator, distinct from the profiled program's
/// allocator that the shim replaces. The engine never touches memory
/// contents itself; moving a block's payload on resize goes through `copy`.
pub trait HostHeap {
    /// Obtains raw storage, optionally zero-filled. `None` means the request
    /// cannot be satisfied; the engine commits no state in that case.
    fn alloc(&mut self, size: u64, align: u64, zeroed: bool) -> Option<u64>;

    /// Releases storage previously returned by `alloc`.
    fn release(&mut self, base: u64);

    /// Copies `len` bytes from `src` to `dst` (used when a resize moves a
    /// block).
    fn copy(&mut self, src: u64, dst: u64, len: u64);
}

/// Process-wide allocation counters, mirrored by every birth, death and
/// resize.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTotals {
    tot_blocks: u64,
    tot_bytes: u64,
    cur_blocks_live: u64,
    cur_bytes_live: u64,
    // Live counts at the global point of maximum byte liveness.
    max_blocks_live: u64,
    max_bytes_live: u64,
}

impl ProcessTotals {
    pub(crate) fn record_birth(&mut self, size: u64) {
        self.tot_blocks += 1;
        self.tot_bytes += size;

        self.cur_blocks_live += 1;
        self.cur_bytes_live += size;
        if self.cur_bytes_live > self.max_bytes_live {
            self.max_bytes_live = self.cur_bytes_live;
            self.max_blocks_live = self.cur_blocks_live;
        }
    }

    pub(crate) fn record_death(&mut self, size: u64) {
        assert!(self.cur_blocks_live > 0, "process live block underflow");
        assert!(
            self.cur_bytes_live >= size,
            "process live byte underflow on death"
        );
        self.cur_blocks_live -= 1;
        self.cur_bytes_live -= size;
    }

    pub(crate) fn adjust_live_bytes(&mut self, delta: i64) {
        if delta < 0 {
            let shrink = delta.unsigned_abs();
            assert!(
                self.cur_bytes_live >= shrink,
                "process live byte underflow on resize"
            );
            self.cur_bytes_live -= shrink;
        } else {
            let grow = delta as u64;
            self.cur_bytes_live += grow;
            if self.cur_bytes_live > self.max_bytes_live {
                self.max_bytes_live = self.cur_bytes_live;
                self.max_blocks_live = self.cur_blocks_live;
            }
            self.tot_bytes += grow;
        }
    }

    pub fn tot_blocks(&self) -> u64 {
        self.tot_blocks
    }

    pub fn tot_bytes(&self) -> u64 {
        self.tot_bytes
    }

    pub fn cur_blocks_live(&self) -> u64 {
        self.cur_blocks_live
    }

    pub fn cur_bytes_live(&self) -> u64 {
        self.cur_bytes_live
    }

    pub fn max_blocks_live(&self) -> u64 {
        self.max_blocks_live
    }

    pub fn max_bytes_live(&self) -> u64 {
        self.max_bytes_live
    }
}

/// The profiling engine.
///
/// Owns the live-block index, the per-site aggregator and the process-wide
/// counters; the host instrumentation layer drives it through the hook
/// methods, one event at a time. The engine performs no locking of its own:
/// event delivery is a single synchronous stream, and serializing it is the
/// host's job.
pub struct HeapProfiler<H> {
    host: H,
    config: HeapProfilerConfig,
    clock: Timestamp,
    index: BlockIndex,
    sites: FastHashMap<SiteId, SiteStats>,
    totals: ProcessTotals,
}

impl<H: HostHeap> HeapProfiler<H> {
    pub fn new(host: H, config: HeapProfilerConfig) -> Self {
        Self {
            host,
            config,
            clock: 0,
            index: BlockIndex::new(),
            sites: FastHashMap::default(),
            totals: ProcessTotals::default(),
        }
    }

    /// Advances the logical clock by `instrs` executed guest instructions.
    ///
    /// The host calls this per translated basic block; death ages are
    /// measured on this clock.
    pub fn tick(&mut self, instrs: u64) {
        self.clock += instrs;
    }

    // === Allocation lifecycle ===

    /// Creates a new tracked block. Returns the payload address, or `None`
    /// if the host cannot provide storage (in which case nothing changed).
    ///
    /// A zero-byte request is normalized to one byte so the block still
    /// occupies the index, matching malloc's "usable non-null pointer"
    /// contract.
    pub fn alloc(&mut self, site: SiteId, size: u64, align: u64, zeroed: bool) -> Option<u64> {
        let size = size.max(1);
        let base = self.host.alloc(size, align, zeroed)?;

        let with_histogram = size <= self.config.histogram_size_limit.as_u64();
        self.index
            .insert(Block::new(base, size, site, self.clock, with_histogram));

        self.sites
            .entry(site)
            .or_insert_with(|| SiteStats::new(site))
            .record_birth(size);
        self.totals.record_birth(size);

        trace!(%site, size, base, "alloc");
        Some(base)
    }

    /// `calloc`: `count * item_size` zero-filled bytes, `None` on overflow.
    pub fn alloc_zeroed(&mut self, site: SiteId, count: u64, item_size: u64) -> Option<u64> {
        let size = count.checked_mul(item_size)?;
        self.alloc(site, size, self.config.default_alignment, true)
    }

    /// `memalign`: explicitly aligned allocation.
    pub fn alloc_aligned(&mut self, site: SiteId, align: u64, size: u64) -> Option<u64> {
        self.alloc(site, size, align, false)
    }

    /// Frees the block starting exactly at `addr`.
    ///
    /// An address that is not some live block's base (never allocated,
    /// already freed, or interior) is a bogus free and is silently ignored:
    /// the profiler must never crash the program it observes.
    pub fn free(&mut self, addr: u64) {
        match self.index.find_containing(addr) {
            Some(block) if block.base() == addr => {}
            _ => return, // bogus free
        }

        let block = self.index.remove_exact(addr);
        self.host.release(addr);

        let stats = self
            .sites
            .get_mut(&block.site())
            .expect("block died at an unknown allocation site");
        stats.record_death(&block, self.clock);
        self.totals.record_death(block.size());

        trace!(site = %block.site(), size = block.size(), base = addr, "free");
    }

    /// Resizes the block starting exactly at `addr` to `new_size` bytes.
    ///
    /// Returns the block's (possibly new) payload address; `None` for a
    /// bogus request or when the host cannot provide storage for a grown
    /// block, in which case the original block is left intact.
    ///
    /// Zero-size requests are the shim's business ([`Self::realloc`] maps
    /// them to `free`); this method requires `new_size > 0`.
    pub fn resize(&mut self, addr: u64, new_size: u64) -> Option<u64> {
        assert!(new_size > 0, "zero-size resize must be mapped to free");

        let (site, old_size) = match self.index.find_containing_mut(addr) {
            Some(block) if block.base() == addr => {
                // Keeping the histogram meaningful across a size change is
                // not worth the complexity; it is dropped regardless of the
                // resize direction and never comes back.
                block.discard_histogram();

                let old_size = block.size();
                if new_size <= old_size {
                    block.set_size(new_size);
                }
                (block.site(), old_size)
            }
            _ => return None, // bogus resize
        };

        let delta = new_size as i64 - old_size as i64;

        if new_size <= old_size {
            self.change_live_bytes(site, delta);
            trace!(%site, old_size, new_size, base = addr, "resize in place");
            return Some(addr);
        }

        // The block grows: move it to fresh storage, keeping the old
        // contents as the new prefix. A failed host allocation leaves the
        // original block untouched (short of its histogram).
        let new_base = self
            .host
            .alloc(new_size, self.config.default_alignment, false)?;
        self.host.copy(addr, new_base, old_size);
        self.host.release(addr);

        let mut block = self.index.remove_exact(addr);
        block.relocate(new_base, new_size);
        self.index.insert(block);

        self.change_live_bytes(site, delta);
        trace!(%site, old_size, new_size, base = new_base, "resize moved");
        Some(new_base)
    }

    /// `realloc`: `addr` 0 behaves as `alloc`, `new_size` 0 behaves as
    /// `free` (returning `None`), anything else as [`Self::resize`].
    pub fn realloc(&mut self, site: SiteId, addr: u64, new_size: u64) -> Option<u64> {
        if addr == 0 {
            return self.alloc(site, new_size, self.config.default_alignment, false);
        }
        if new_size == 0 {
            self.free(addr);
            return None;
        }
        self.resize(addr, new_size)
    }

    // === Memory access hooks ===

    pub fn on_read(&mut self, addr: u64, len: u64) {
        self.record_access(addr, len, false);
    }

    pub fn on_write(&mut self, addr: u64, len: u64) {
        self.record_access(addr, len, true);
    }

    /// Bulk read performed on the program's behalf by a syscall (the kernel
    /// reading user space). Assumed never to straddle a heap-block boundary,
    /// so it is processed as one contiguous touch.
    pub fn on_syscall_read(&mut self, addr: u64, len: u64) {
        self.record_access(addr, len, false);
    }

    /// Bulk write performed on the program's behalf by a syscall (e.g. a
    /// `read(2)` filling a heap buffer).
    pub fn on_syscall_write(&mut self, addr: u64, len: u64) {
        self.record_access(addr, len, true);
    }

    fn record_access(&mut self, addr: u64, len: u64, is_write: bool) {
        // Accesses outside any live block (stack, globals, freed memory) are
        // not ours to judge; the profiler is not a correctness checker.
        if let Some(block) = self.index.find_containing_mut(addr) {
            block.record_access(addr, len, is_write);
        }
    }

    fn change_live_bytes(&mut self, site: SiteId, delta: i64) {
        let stats = self
            .sites
            .get_mut(&site)
            .expect("resize for an unknown allocation site");
        stats.adjust_live_bytes(delta);
        self.totals.adjust_live_bytes(delta);
    }

    // === Shutdown / reporting surface ===

    pub fn clock(&self) -> Timestamp {
        self.clock
    }

    pub fn totals(&self) -> &ProcessTotals {
        &self.totals
    }

    pub fn site(&self, site: SiteId) -> Option<&SiteStats> {
        self.sites.get(&site)
    }

    pub fn sites(&self) -> impl Iterator<Item = &SiteStats> {
        self.sites.values()
    }

    pub fn live_blocks(&self) -> impl Iterator<Item = &Block> {
        self.index.iter()
    }

    pub fn report(&self) -> HeapReport<'_> {
        HeapReport::new(
            self.sites.values().collect(),
            self.totals,
            self.clock,
            self.config.report_top_sites,
        )
    }
}
