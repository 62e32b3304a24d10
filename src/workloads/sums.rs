//! Batch summation with an end-to-end integrity check.
//!
//! Producers generate numbers in fixed-size groups, consumers sum each group.
//! Both sides keep a running total; if the pipeline lost or duplicated a batch
//! the two totals disagree.
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    pipeline::{config::PipelineConfig, Pipeline, PipelineReport},
    scheduling::partition::Partitioner,
    PipeError,
};

/// One group of generated numbers.
pub type Batch = Vec<u64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumReport {
    pub total_numbers: usize,
    pub groups: usize,
    /// Sum of every batch the producers generated.
    pub produced_sum: u64,
    /// Sum of every batch the consumers summed.
    pub consumed_sum: u64,
    pub pipeline: PipelineReport,
}

impl SumReport {
    pub fn matches(&self) -> bool {
        self.produced_sum == self.consumed_sum
    }
}

/// Deterministic value in `1..=100` for position `index`.
pub fn number_at(index: usize) -> u64 {
    (index as u64).wrapping_mul(2_654_435_761) % 100 + 1
}

/// Group boundaries over `0..total`: `total / group_size` groups of
/// `group_size`, the last one also taking the leftover numbers. Fewer than
/// `group_size` numbers make a single short group.
pub fn groups(total: usize, group_size: usize) -> Result<Vec<Range<usize>>, PipeError> {
    if group_size == 0 {
        return Err(PipeError::InvalidConfiguration(
            "group_size must be greater than 0".to_string(),
        ));
    }
    if total == 0 {
        return Ok(Vec::new());
    }
    let count = (total / group_size).max(1);
    Ok((0..count)
        .map(|i| {
            let end = if i + 1 == count { total } else { (i + 1) * group_size };
            i * group_size..end
        })
        .collect())
}

/// Sum `total` generated numbers through a pipeline sized by `config`, in
/// groups of `group_size`.
pub fn batch_sum(
    total: usize,
    group_size: usize,
    config: PipelineConfig,
) -> Result<SumReport, PipeError> {
    let groups = groups(total, group_size)?;
    let deals = Partitioner::new(config.producer_count)?.assign(groups.len());
    let pipeline = Pipeline::new(config)?;

    let produced = AtomicU64::new(0);
    let consumed = AtomicU64::new(0);
    let sources: Vec<_> = deals
        .into_iter()
        .map(|deal| {
            let produced = &produced;
            groups[deal].to_vec().into_iter().map(move |range| {
                let batch: Batch = range.map(number_at).collect();
                produced.fetch_add(batch.iter().sum(), Relaxed);
                batch
            })
        })
        .collect();

    let report = pipeline.run(sources, &|batch: Batch| {
        consumed.fetch_add(batch.iter().sum(), Relaxed);
        Ok(())
    })?;

    let report = SumReport {
        total_numbers: total,
        groups: groups.len(),
        produced_sum: produced.into_inner(),
        consumed_sum: consumed.into_inner(),
        pipeline: report,
    };
    if report.matches() {
        info!(
            groups = report.groups,
            sum = report.consumed_sum,
            "producer and consumer totals agree"
        );
    } else {
        warn!(
            produced = report.produced_sum,
            consumed = report.consumed_sum,
            "producer and consumer totals differ"
        );
    }
    Ok(report)
}
