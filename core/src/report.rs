use std::fmt::{self, Write};

use heaptrail_util::FastHashSet;

use crate::block::Timestamp;
use crate::profiler::ProcessTotals;
use crate::site::SiteStats;

/// Metric used to order allocation sites in a ranked listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMetric {
    MaxBytesLive,
    MaxBlocksLive,
    TotBytes,
}

impl RankMetric {
    pub fn name(self) -> &'static str {
        match self {
            Self::MaxBytesLive => "max_bytes_live",
            Self::MaxBlocksLive => "max_blocks_live",
            Self::TotBytes => "tot_bytes",
        }
    }

    fn value(self, stats: &SiteStats) -> u64 {
        match self {
            Self::MaxBytesLive => stats.max_bytes_live(),
            Self::MaxBlocksLive => stats.max_blocks_live(),
            Self::TotBytes => stats.tot_bytes(),
        }
    }
}

/// Shutdown snapshot of all site records plus the process-wide counters.
///
/// This is the only state observable outside the engine once the profiled
/// program has terminated. Rendering is plain text into any [`fmt::Write`];
/// outer report formats are somebody else's concern.
pub struct HeapReport<'a> {
    sites: Vec<&'a SiteStats>,
    totals: ProcessTotals,
    clock: Timestamp,
    // Configured listing length, used by `write_top_sites`.
    top_n: usize,
}

impl<'a> HeapReport<'a> {
    pub(crate) fn new(
        sites: Vec<&'a SiteStats>,
        totals: ProcessTotals,
        clock: Timestamp,
        top_n: usize,
    ) -> Self {
        Self {
            sites,
            totals,
            clock,
            top_n,
        }
    }

    /// The top `n` sites by `metric`, best first.
    ///
    /// Each pick is a full scan over the not-yet-shown records; O(n * sites)
    /// overall, which is fine for a pass that runs once at shutdown. Sites
    /// whose metric is zero are never listed.
    pub fn top_sites(&self, metric: RankMetric, n: usize) -> Vec<&'a SiteStats> {
        let mut shown = FastHashSet::default();
        let mut out = Vec::new();

        for _ in 0..n {
            let mut best: Option<&'a SiteStats> = None;
            let mut best_value = 0;
            for &stats in &self.sites {
                if shown.contains(&stats.site()) {
                    continue;
                }
                let value = metric.value(stats);
                if value > best_value {
                    best_value = value;
                    best = Some(stats);
                }
            }

            let Some(best) = best else { break };
            shown.insert(best.site());
            out.push(best);
        }

        out
    }

    /// Process-wide summary: totals, peak liveness and instruction density.
    pub fn write_summary(&self, w: &mut impl Write) -> fmt::Result {
        writeln!(w, "==== summary statistics ====")?;
        writeln!(w, "guest_insns: {}", self.clock)?;
        writeln!(
            w,
            "max_live:    {} bytes in {} blocks",
            self.totals.max_bytes_live(),
            self.totals.max_blocks_live()
        )?;
        writeln!(
            w,
            "tot_alloc:   {} bytes in {} blocks",
            self.totals.tot_bytes(),
            self.totals.tot_blocks()
        )?;
        if self.totals.tot_bytes() > 0 {
            writeln!(
                w,
                "insns per allocated byte: {}",
                self.clock / self.totals.tot_bytes()
            )?;
        }
        Ok(())
    }

    /// Ranked listing by `metric`, as many entries as the profiler config
    /// asked for (`report_top_sites`).
    pub fn write_top_sites(&self, w: &mut impl Write, metric: RankMetric) -> fmt::Result {
        let top = self.top_sites(metric, self.top_n);

        writeln!(
            w,
            "==== top {} allocation sites by decreasing {} ====",
            self.top_n,
            metric.name()
        )?;
        for (i, stats) in top.iter().enumerate() {
            writeln!(w)?;
            writeln!(w, "-- {} of {} --", i + 1, top.len())?;
            write_site(w, stats)?;
        }
        writeln!(w)?;
        Ok(())
    }
}

fn write_site(w: &mut impl Write, stats: &SiteStats) -> fmt::Result {
    writeln!(w, "site:        {}", stats.site())?;
    writeln!(
        w,
        "max_live:    {} bytes in {} blocks",
        stats.max_bytes_live(),
        stats.max_blocks_live()
    )?;
    writeln!(
        w,
        "tot_alloc:   {} bytes in {} blocks",
        stats.tot_bytes(),
        stats.tot_blocks()
    )?;

    match stats.mean_death_age() {
        Some(age) => writeln!(w, "deaths:      {}, at avg age {age}", stats.deaths())?,
        None => writeln!(w, "deaths:      none (none of these blocks were freed)")?,
    }

    writeln!(
        w,
        "acc_ratios:  {} rd, {} wr ({} b-read, {} b-written)",
        DisplayRatio {
            accessed: stats.read_bytes(),
            allocated: stats.tot_bytes(),
        },
        DisplayRatio {
            accessed: stats.write_bytes(),
            allocated: stats.tot_bytes(),
        },
        stats.read_bytes(),
        stats.write_bytes(),
    )?;

    if let Some(folded) = stats.folded_histogram() {
        writeln!(w)?;
        writeln!(w, "aggregated access counts by offset:")?;
        for (row, counts) in folded.chunks(16).enumerate() {
            write!(w, "[{:4}] ", row * 16)?;
            for count in counts {
                write!(w, " {count}")?;
            }
            writeln!(w)?;
        }
    }
    Ok(())
}

/// Accessed-to-allocated byte ratio in hundredths, `Inf` when nothing was
/// ever allocated.
struct DisplayRatio {
    accessed: u64,
    allocated: u64,
}

impl fmt::Display for DisplayRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.allocated == 0 {
            return f.write_str("Inf");
        }
        let hundredths = (100 * self.accessed) / self.allocated;
        write!(f, "{}.{:02}", hundredths / 100, hundredths % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::SiteId;
    use crate::site::SiteStats;

    fn site_with(site: u64, births: &[u64], deaths: usize) -> SiteStats {
        let mut stats = SiteStats::new(SiteId(site));
        for &size in births {
            stats.record_birth(size);
        }
        for &size in births.iter().take(deaths) {
            let block = crate::block::Block::new(0x1000, size, SiteId(site), 0, true);
            stats.record_death(&block, 0);
        }
        stats
    }

    fn report(sites: &[SiteStats]) -> HeapReport<'_> {
        HeapReport::new(sites.iter().collect(), ProcessTotals::default(), 0, 10)
    }

    // === Ranking ===

    #[test]
    fn top_sites_orders_by_metric() {
        let sites = [
            site_with(1, &[10], 0),
            site_with(2, &[100], 0),
            site_with(3, &[50], 0),
        ];
        let report = report(&sites);

        let top: Vec<_> = report
            .top_sites(RankMetric::MaxBytesLive, 10)
            .into_iter()
            .map(|s| s.site())
            .collect();

        assert_eq!(top, [SiteId(2), SiteId(3), SiteId(1)]);
    }

    #[test]
    fn top_sites_respects_n() {
        let sites = [
            site_with(1, &[10], 0),
            site_with(2, &[100], 0),
            site_with(3, &[50], 0),
        ];
        let report = report(&sites);

        assert_eq!(report.top_sites(RankMetric::MaxBytesLive, 2).len(), 2);
    }

    #[test]
    fn zero_metric_sites_are_not_listed() {
        let sites = [site_with(1, &[10], 0), SiteStats::new(SiteId(2))];
        let report = report(&sites);

        let top = report.top_sites(RankMetric::MaxBytesLive, 10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].site(), SiteId(1));
    }

    #[test]
    fn metrics_disagree() {
        // Site 1 peaks high in bytes with one block; site 2 peaks low in
        // bytes across many blocks.
        let sites = [site_with(1, &[1000], 0), site_with(2, &[1, 1, 1, 1], 0)];
        let report = report(&sites);

        let by_bytes = report.top_sites(RankMetric::MaxBytesLive, 1);
        let by_blocks = report.top_sites(RankMetric::MaxBlocksLive, 1);

        assert_eq!(by_bytes[0].site(), SiteId(1));
        assert_eq!(by_blocks[0].site(), SiteId(2));
    }

    // === Rendering ===

    #[test]
    fn summary_includes_instruction_density() {
        let mut totals = ProcessTotals::default();
        // 100 bytes allocated over 1000 instructions.
        for _ in 0..10 {
            totals.record_birth(10);
        }
        let report = HeapReport::new(Vec::new(), totals, 1000, 10);

        let mut out = String::new();
        report.write_summary(&mut out).unwrap();

        assert!(out.contains("guest_insns: 1000"));
        assert!(out.contains("tot_alloc:   100 bytes in 10 blocks"));
        assert!(out.contains("insns per allocated byte: 10"));
    }

    #[test]
    fn summary_with_no_allocations_skips_density() {
        let report = HeapReport::new(Vec::new(), ProcessTotals::default(), 1000, 10);

        let mut out = String::new();
        report.write_summary(&mut out).unwrap();

        assert!(!out.contains("insns per allocated byte"));
    }

    #[test]
    fn site_listing_shows_deaths_and_ratios() {
        let mut stats = SiteStats::new(SiteId(7));
        stats.record_birth(16);
        let mut block = crate::block::Block::new(0x1000, 16, SiteId(7), 0, false);
        block.record_access(0x1000, 16, true);
        block.record_access(0x1000, 8, false);
        stats.record_death(&block, 32);

        let mut out = String::new();
        write_site(&mut out, &stats).unwrap();

        assert!(out.contains("site:        7"));
        assert!(out.contains("deaths:      1, at avg age 32"));
        assert!(out.contains("0.50 rd, 1.00 wr (8 b-read, 16 b-written)"));
    }

    #[test]
    fn site_listing_without_deaths() {
        let stats = site_with(7, &[16], 0);

        let mut out = String::new();
        write_site(&mut out, &stats).unwrap();

        assert!(out.contains("deaths:      none"));
    }

    #[test]
    fn site_listing_dumps_folded_histogram_in_rows() {
        let mut stats = SiteStats::new(SiteId(7));
        stats.record_birth(20);
        let mut block = crate::block::Block::new(0x1000, 20, SiteId(7), 0, true);
        block.record_access(0x1000, 20, true);
        stats.record_death(&block, 0);

        let mut out = String::new();
        write_site(&mut out, &stats).unwrap();

        assert!(out.contains("aggregated access counts by offset:"));
        assert!(out.contains("[   0]  1 1 1 1 1 1 1 1 1 1 1 1 1 1 1 1"));
        assert!(out.contains("[  16]  1 1 1 1"));
    }

    #[test]
    fn ranked_listing_numbers_entries() {
        let sites = [site_with(1, &[10], 0), site_with(2, &[100], 0)];
        let report = report(&sites);

        let mut out = String::new();
        report
            .write_top_sites(&mut out, RankMetric::MaxBytesLive)
            .unwrap();

        assert!(out.contains("top 10 allocation sites by decreasing max_bytes_live"));
        assert!(out.contains("-- 1 of 2 --"));
        assert!(out.contains("-- 2 of 2 --"));
    }

    #[test]
    fn listing_length_is_capped_by_the_configured_top_n() {
        let sites = [
            site_with(1, &[10], 0),
            site_with(2, &[100], 0),
            site_with(3, &[50], 0),
        ];
        let report = HeapReport::new(sites.iter().collect(), ProcessTotals::default(), 0, 1);

        let mut out = String::new();
        report
            .write_top_sites(&mut out, RankMetric::MaxBytesLive)
            .unwrap();

        assert!(out.contains("top 1 allocation sites"));
        assert!(out.contains("site:        2"));
        assert!(!out.contains("site:        3"));
        assert!(!out.contains("-- 2 of"));
    }

    #[test]
    fn inf_ratio_when_nothing_allocated() {
        let ratio = DisplayRatio {
            accessed: 42,
            allocated: 0,
        };

        assert_eq!(ratio.to_string(), "Inf");
    }
}
