pub use self::block::{AccessHistogram, Block, SiteId, Timestamp};
pub use self::config::HeapProfilerConfig;
pub use self::index::BlockIndex;
pub use self::profiler::{HeapProfiler, HostHeap, ProcessTotals};
pub use self::report::{HeapReport, RankMetric};
pub use self::site::{HistogramState, SiteStats};

mod block;
mod config;
mod index;
mod profiler;
mod report;
mod site;
