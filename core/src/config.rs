use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeapProfilerConfig {
    /// Blocks at or below this size carry a per-byte access histogram.
    ///
    /// Larger blocks are still fully accounted for in read/write totals,
    /// they just skip the per-offset counters.
    ///
    /// Default: 4 KiB.
    pub histogram_size_limit: ByteSize,

    /// Alignment used for allocations that do not request one explicitly
    /// (plain malloc and the moving half of realloc).
    ///
    /// Default: 16.
    pub default_alignment: u64,

    /// Number of allocation sites shown in each ranked report listing.
    ///
    /// Default: 200.
    pub report_top_sites: usize,
}

impl Default for HeapProfilerConfig {
    fn default() -> Self {
        Self {
            histogram_size_limit: ByteSize::kib(4),
            default_alignment: 16,
            report_top_sites: 200,
        }
    }
}
