use std::fmt;

/// Opaque call-site identity.
///
/// Produced by the host's call-stack resolver; two allocations performed from
/// the same call stack carry the same id. The engine never looks inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SiteId(pub u64);

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Logical time, measured in guest instructions executed.
pub type Timestamp = u64;

/// Per-byte access counters for a single live block.
///
/// One counter per payload byte, latching at 255. Only blocks at or below the
/// configured size ceiling carry one, and a resize drops it for good.
#[derive(Debug)]
pub struct AccessHistogram {
    counts: Box<[u8]>,
}

impl AccessHistogram {
    fn new(len: usize) -> Self {
        Self {
            counts: vec![0; len].into_boxed_slice(),
        }
    }

    pub fn counts(&self) -> &[u8] {
        &self.counts
    }

    /// Bumps the counters for `[offset, offset + len)`, clipped to the block
    /// bounds. Counters saturate at 255 and never wrap.
    fn record(&mut self, offset: u64, len: u64) {
        debug_assert!(offset < self.counts.len() as u64);
        let start = offset as usize;
        let end = offset.saturating_add(len).min(self.counts.len() as u64) as usize;
        for count in &mut self.counts[start..end] {
            *count = count.saturating_add(1);
        }
    }
}

/// Metadata for one currently-live heap allocation.
///
/// A block is owned by the interval index for its whole lifetime. On death
/// its final counters are folded into the owning site record and the block
/// is discarded.
#[derive(Debug)]
pub struct Block {
    base: u64,
    size: u64,
    site: SiteId,
    allocated_at: Timestamp,
    read_bytes: u64,
    write_bytes: u64,
    histogram: Option<AccessHistogram>,
}

impl Block {
    pub(crate) fn new(
        base: u64,
        size: u64,
        site: SiteId,
        allocated_at: Timestamp,
        with_histogram: bool,
    ) -> Self {
        assert!(size > 0, "zero-sized blocks cannot live in the index");
        Self {
            base,
            size,
            site,
            allocated_at,
            read_bytes: 0,
            write_bytes: 0,
            histogram: with_histogram.then(|| AccessHistogram::new(size as usize)),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn site(&self) -> SiteId {
        self.site
    }

    pub fn allocated_at(&self) -> Timestamp {
        self.allocated_at
    }

    pub fn read_bytes(&self) -> u64 {
        self.read_bytes
    }

    pub fn write_bytes(&self) -> u64 {
        self.write_bytes
    }

    pub fn histogram(&self) -> Option<&AccessHistogram> {
        self.histogram.as_ref()
    }

    /// One past the last payload byte.
    pub fn end(&self) -> u64 {
        self.base + self.size
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.base <= addr && addr < self.end()
    }

    /// Accounts for a read or write starting at `addr`.
    ///
    /// The read/write byte total is credited with the full requested length;
    /// histogram counters only cover the part that falls inside the block.
    pub(crate) fn record_access(&mut self, addr: u64, len: u64, is_write: bool) {
        debug_assert!(self.contains(addr));
        if is_write {
            self.write_bytes += len;
        } else {
            self.read_bytes += len;
        }
        if let Some(histogram) = &mut self.histogram {
            histogram.record(addr - self.base, len);
        }
    }

    pub(crate) fn discard_histogram(&mut self) {
        self.histogram = None;
    }

    /// Shrinks the block in place. Growth always moves the block instead,
    /// so the index neighbors stay untouched.
    pub(crate) fn set_size(&mut self, size: u64) {
        assert!(size > 0);
        assert!(size <= self.size, "in-place growth would overlap a neighbor");
        self.size = size;
    }

    pub(crate) fn relocate(&mut self, base: u64, size: u64) {
        assert!(size > 0);
        self.base = base;
        self.size = size;
    }
}
