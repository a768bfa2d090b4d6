pub mod aggregate;
pub mod artifacts;
pub mod baseline;
pub mod labels;
pub mod metrics;
pub mod sweep;
pub mod table;
pub mod threshold;

#[cfg(test)]
mod test_support;

pub use table::{Metric, MetricTable};
pub use threshold::Threshold;
