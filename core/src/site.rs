use tracing::debug;

use crate::block::{Block, SiteId, Timestamp};

/// Tracks whether a folded per-offset histogram is meaningful for a site.
///
/// Transitions only ever move forward: `Unknown` → `Exactly` → `Mixed`.
/// `Mixed` is absorbing; once blocks of two different sizes have died here,
/// offset data stays discarded even if later deaths match the old size again.
#[derive(Debug)]
pub enum HistogramState {
    /// No block from this site has died yet.
    Unknown,
    /// Every block that died so far had this exact size.
    ///
    /// `folded` is present iff the first dying block carried a per-block
    /// histogram (i.e. was small enough); it always has exactly `size`
    /// entries.
    Exactly { size: u64, folded: Option<Box<[u32]>> },
    /// Blocks of more than one size have died; offset data is meaningless.
    Mixed,
}

/// Running statistics for one allocation call site.
///
/// Created lazily on the first allocation attributed to the site and kept
/// until shutdown reporting; it outlives every block it has summarized.
#[derive(Debug)]
pub struct SiteStats {
    site: SiteId,
    cur_blocks_live: u64,
    cur_bytes_live: u64,
    // Liveness recorded at the site's own point of maximum *byte* liveness.
    // `max_blocks_live` is not the maximum block count; the two can diverge.
    max_blocks_live: u64,
    max_bytes_live: u64,
    tot_blocks: u64,
    tot_bytes: u64,
    deaths: u64,
    death_ages_sum: u64,
    read_bytes: u64,
    write_bytes: u64,
    histogram_state: HistogramState,
}

impl SiteStats {
    pub(crate) fn new(site: SiteId) -> Self {
        Self {
            site,
            cur_blocks_live: 0,
            cur_bytes_live: 0,
            max_blocks_live: 0,
            max_bytes_live: 0,
            tot_blocks: 0,
            tot_bytes: 0,
            deaths: 0,
            death_ages_sum: 0,
            read_bytes: 0,
            write_bytes: 0,
            histogram_state: HistogramState::Unknown,
        }
    }

    pub(crate) fn record_birth(&mut self, size: u64) {
        self.cur_blocks_live += 1;
        self.cur_bytes_live += size;
        if self.cur_bytes_live > self.max_bytes_live {
            self.max_bytes_live = self.cur_bytes_live;
            self.max_blocks_live = self.cur_blocks_live;
        }

        self.tot_blocks += 1;
        self.tot_bytes += size;
    }

    pub(crate) fn record_death(&mut self, block: &Block, now: Timestamp) {
        assert!(
            self.cur_blocks_live >= 1,
            "block death at site {} with no live blocks",
            self.site
        );
        assert!(
            self.cur_bytes_live >= block.size(),
            "block death at site {} would underflow live bytes",
            self.site
        );
        self.cur_blocks_live -= 1;
        self.cur_bytes_live -= block.size();

        self.deaths += 1;
        assert!(
            block.allocated_at() <= now,
            "block at site {} died before it was born",
            self.site
        );
        self.death_ages_sum += now - block.allocated_at();

        self.read_bytes += block.read_bytes();
        self.write_bytes += block.write_bytes();

        let transition = match &self.histogram_state {
            HistogramState::Unknown => {
                debug_assert_eq!(self.deaths, 1);
                debug!(site = %self.site, size = block.size(), "histogram state: exactly");
                Some(HistogramState::Exactly {
                    size: block.size(),
                    folded: block
                        .histogram()
                        .map(|h| vec![0; h.counts().len()].into_boxed_slice()),
                })
            }
            HistogramState::Exactly { size, .. } if *size != block.size() => {
                debug!(
                    site = %self.site,
                    expected = *size,
                    got = block.size(),
                    "histogram state: mixed"
                );
                Some(HistogramState::Mixed)
            }
            _ => None,
        };
        if let Some(state) = transition {
            self.histogram_state = state;
        }

        if let HistogramState::Exactly {
            size,
            folded: Some(folded),
        } = &mut self.histogram_state
            && let Some(histogram) = block.histogram()
        {
            debug_assert_eq!(*size, block.size());
            for (acc, &count) in folded.iter_mut().zip(histogram.counts()) {
                // Folded counters saturate rather than wrap for very hot
                // offsets.
                *acc = acc.saturating_add(u32::from(count));
            }
        }
    }

    /// Applies a signed live-byte change from a block resize.
    ///
    /// Only a positive delta counts as new allocation credit; shrinking a
    /// block never reduces the lifetime total.
    pub(crate) fn adjust_live_bytes(&mut self, delta: i64) {
        if delta < 0 {
            let shrink = delta.unsigned_abs();
            assert!(
                self.cur_bytes_live >= shrink,
                "resize at site {} would underflow live bytes",
                self.site
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

    pub fn site(&self) -> SiteId {
        self.site
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

    pub fn tot_blocks(&self) -> u64 {
        self.tot_blocks
    }

    pub fn tot_bytes(&self) -> u64 {
        self.tot_bytes
    }

    pub fn deaths(&self) -> u64 {
        self.deaths
    }

    pub fn death_ages_sum(&self) -> u64 {
        self.death_ages_sum
    }

    pub fn mean_death_age(&self) -> Option<u64> {
        (self.deaths > 0).then(|| self.death_ages_sum / self.deaths)
    }

    pub fn read_bytes(&self) -> u64 {
        self.read_bytes
    }

    pub fn write_bytes(&self) -> u64 {
        self.write_bytes
    }

    pub fn histogram_state(&self) -> &HistogramState {
        &self.histogram_state
    }

    /// The folded per-offset histogram, if the site is still size-uniform
    /// and its blocks were small enough to carry per-block counters.
    pub fn folded_histogram(&self) -> Option<&[u32]> {
        match &self.histogram_state {
            HistogramState::Exactly {
                folded: Some(folded),
                ..
            } => Some(folded),
            _ => None,
        }
    }
}
