//! Row-chunked matrix multiplication over a pipeline.
//!
//! The producer side cuts `A` into contiguous row blocks, consumers multiply each
//! block by `B` and write the product straight into a [`SharedResult`]. The
//! multiplication itself is pluggable: anything shaped like [`naive_multiply`]
//! can be passed in.
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    logging::report::RunReport,
    pipeline::{config::PipelineConfig, Pipeline, PipelineReport},
    scheduling::partition::Partitioner,
    PipeError,
};

const RTOL: f64 = 1e-5;
const ATOL: f64 = 1e-8;

/// Dense row-major matrix of `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    /// Wrap row-major `data`, which must hold exactly `rows * cols` values.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, PipeError> {
        if data.len() != rows * cols {
            return Err(PipeError::DimensionMismatch(format!(
                "{} values cannot fill a {rows}x{cols} matrix",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn identity(n: usize) -> Self {
        Self::from_fn(n, n, |r, c| if r == c { 1.0 } else { 0.0 })
    }

    /// `0, 1, 2, ...` in row-major order.
    pub fn counting(rows: usize, cols: usize) -> Self {
        Self::from_fn(rows, cols, |r, c| (r * cols + c) as f64)
    }

    /// Reproducible values in `[0, 1)` from a xorshift stream seeded by `seed`.
    pub fn pseudo_random(rows: usize, cols: usize, seed: u64) -> Self {
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        Self::from_fn(rows, cols, |_, _| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 11) as f64 / (1u64 << 53) as f64
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.data[row * self.cols + col])
    }

    pub fn row(&self, row: usize) -> Option<&[f64]> {
        (row < self.rows).then(|| &self.data[row * self.cols..(row + 1) * self.cols])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Owned copy of the rows in `rows`.
    pub fn row_block(&self, rows: Range<usize>) -> Result<Matrix, PipeError> {
        if rows.start > rows.end || rows.end > self.rows {
            return Err(PipeError::RegionOutOfBounds {
                start: rows.start,
                end: rows.end,
                rows: self.rows,
            });
        }
        Ok(self.block(rows))
    }

    fn block(&self, rows: Range<usize>) -> Matrix {
        Matrix {
            rows: rows.len(),
            cols: self.cols,
            data: self.data[rows.start * self.cols..rows.end * self.cols].to_vec(),
        }
    }

    /// Element-wise `|a - b| <= ATOL + RTOL * |b|` over equally shaped matrices.
    pub fn approx_eq(&self, other: &Matrix) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= ATOL + RTOL * b.abs())
    }
}

/// Textbook triple loop, the reference every other multiply is checked against.
pub fn naive_multiply(a: &Matrix, b: &Matrix) -> Result<Matrix, PipeError> {
    check_inner(a, b)?;
    let mut out = Matrix::zeros(a.rows, b.cols);
    for i in 0..a.rows {
        for k in 0..a.cols {
            let lhs = a.data[i * a.cols + k];
            if lhs == 0.0 {
                continue;
            }
            let rhs = &b.data[k * b.cols..(k + 1) * b.cols];
            let dst = &mut out.data[i * b.cols..(i + 1) * b.cols];
            for (d, r) in dst.iter_mut().zip(rhs) {
                *d += lhs * r;
            }
        }
    }
    Ok(out)
}

fn check_inner(a: &Matrix, b: &Matrix) -> Result<(), PipeError> {
    if a.cols != b.rows {
        return Err(PipeError::DimensionMismatch(format!(
            "cannot multiply {}x{} by {}x{}",
            a.rows, a.cols, b.rows, b.cols
        )));
    }
    Ok(())
}

/// Single-threaded baseline: multiply `A` chunk by chunk and stitch the result.
pub fn serial_multiply<M>(
    a: &Matrix,
    b: &Matrix,
    parts: usize,
    multiply: &M,
) -> Result<Matrix, PipeError>
where
    M: Fn(&Matrix, &Matrix) -> Result<Matrix, PipeError> + ?Sized,
{
    check_inner(a, b)?;
    let result = SharedResult::new(a.rows, b.cols);
    for rows in Partitioner::new(parts)?.split(a.rows) {
        let start = rows.start;
        let product = multiply(&a.block(rows), b)?;
        result.write_rows(start, &product)?;
    }
    result.into_matrix()
}

/// A row block of `A` and the first result row its product lands on.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkItem {
    pub payload: Matrix,
    pub origin_offset: usize,
}

/// Result buffer written concurrently by consumers without a lock.
///
/// Each row may be claimed exactly once. Claims are atomic, so two chunks that
/// overlap are caught at runtime instead of racing on the same cells.
pub struct SharedResult {
    rows: usize,
    cols: usize,
    cells: Box<[UnsafeCell<f64>]>,
    claimed: Box<[AtomicBool]>,
}

// SAFETY: a cell is only written by the caller that won the claim on its row,
// and only read through `into_matrix`, which takes ownership.
unsafe impl Sync for SharedResult {}

impl SharedResult {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: (0..rows * cols).map(|_| UnsafeCell::new(0.0)).collect(),
            claimed: (0..rows).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Copy `block` into rows `origin..origin + block.rows()`.
    ///
    /// Fails without writing anything if the block does not fit or any of its
    /// rows was already written.
    pub fn write_rows(&self, origin: usize, block: &Matrix) -> Result<(), PipeError> {
        if block.cols != self.cols {
            return Err(PipeError::DimensionMismatch(format!(
                "block has {} columns, result has {}",
                block.cols, self.cols
            )));
        }
        let end = origin.saturating_add(block.rows);
        if end > self.rows {
            return Err(PipeError::RegionOutOfBounds {
                start: origin,
                end,
                rows: self.rows,
            });
        }

        for row in origin..end {
            if self.claimed[row].swap(true, Ordering::AcqRel) {
                for taken in origin..row {
                    self.claimed[taken].store(false, Ordering::Release);
                }
                return Err(PipeError::RegionOverlap(row));
            }
        }

        let dst = &self.cells[origin * self.cols..end * self.cols];
        for (cell, value) in dst.iter().zip(&block.data) {
            // SAFETY: every row in `origin..end` is claimed by this call
            unsafe { *cell.get() = *value };
        }
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.claimed
            .iter()
            .filter(|c| c.load(Ordering::Acquire))
            .count()
    }

    /// The finished matrix. Fails if any row was never written.
    pub fn into_matrix(self) -> Result<Matrix, PipeError> {
        let missing = self.rows - self.rows_written();
        if missing > 0 {
            return Err(PipeError::IncompleteResult { missing });
        }
        let data = self
            .cells
            .into_vec()
            .into_iter()
            .map(UnsafeCell::into_inner)
            .collect();
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }
}

impl fmt::Debug for SharedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResult")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("rows_written", &self.rows_written())
            .finish()
    }
}

/// Multiply `a * b` through a pipeline sized by `config`.
///
/// `A` is cut into one chunk per consumer. The chunks are dealt out to the
/// producers in contiguous runs, and each producer copies its blocks out of `A`
/// only when it is about to offer them. A chunk whose handler fails is dropped,
/// which surfaces here as `IncompleteResult`.
pub fn parallel_multiply<M>(
    a: &Matrix,
    b: &Matrix,
    config: PipelineConfig,
    multiply: &M,
) -> Result<(Matrix, PipelineReport), PipeError>
where
    M: Fn(&Matrix, &Matrix) -> Result<Matrix, PipeError> + Sync + ?Sized,
{
    check_inner(a, b)?;
    let pipeline = Pipeline::new(config)?;
    let chunks = Partitioner::new(config.consumer_count)?.split(a.rows);
    let deals = Partitioner::new(config.producer_count)?.assign(chunks.len());
    debug!(
        rows = a.rows,
        chunks = chunks.len(),
        producers = config.producer_count,
        "dealing matrix chunks"
    );

    let sources: Vec<_> = deals
        .into_iter()
        .map(|deal| {
            chunks[deal].to_vec().into_iter().map(move |rows| ChunkItem {
                origin_offset: rows.start,
                payload: a.block(rows),
            })
        })
        .collect();

    let result = SharedResult::new(a.rows, b.cols);
    let report = pipeline.run(sources, &|item: ChunkItem| {
        let product = multiply(&item.payload, b)?;
        result.write_rows(item.origin_offset, &product)
    })?;
    Ok((result.into_matrix()?, report))
}

/// Time the serial baseline against the pipeline and check they agree.
pub fn compare<M>(
    a: &Matrix,
    b: &Matrix,
    config: PipelineConfig,
    multiply: &M,
) -> Result<RunReport, PipeError>
where
    M: Fn(&Matrix, &Matrix) -> Result<Matrix, PipeError> + Sync + ?Sized,
{
    let started = Instant::now();
    let serial = serial_multiply(a, b, config.consumer_count, multiply)?;
    let elapsed_serial = started.elapsed();

    let started = Instant::now();
    let (parallel, pipeline) = parallel_multiply(a, b, config, multiply)?;
    let elapsed_parallel = started.elapsed();

    Ok(RunReport::new(
        elapsed_serial,
        elapsed_parallel,
        serial.approx_eq(&parallel),
        &pipeline.waits,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn naive_multiply_small() {
        let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Matrix::from_vec(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = naive_multiply(&a, &b).unwrap();
        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let a = Matrix::zeros(2, 3);
        assert!(matches!(
            naive_multiply(&a, &a),
            Err(PipeError::DimensionMismatch(_))
        ));
        assert!(Matrix::from_vec(2, 2, vec![1.0]).is_err());
    }

    #[test]
    fn row_block_bounds() {
        let m = Matrix::counting(4, 2);
        let block = m.row_block(1..3).unwrap();
        assert_eq!(block.as_slice(), &[2.0, 3.0, 4.0, 5.0]);
        assert_eq!(m.row_block(4..4).unwrap().rows(), 0);
        assert!(matches!(
            m.row_block(3..5),
            Err(PipeError::RegionOutOfBounds { rows: 4, .. })
        ));
    }

    #[test]
    fn approx_eq_uses_relative_and_absolute_tolerance() {
        let a = Matrix::from_vec(1, 2, vec![1.0, 1e6]).unwrap();
        let b = Matrix::from_vec(1, 2, vec![1.0 + 1e-9, 1e6 + 1.0]).unwrap();
        assert!(a.approx_eq(&b));
        let c = Matrix::from_vec(1, 2, vec![1.1, 1e6]).unwrap();
        assert!(!a.approx_eq(&c));
        assert!(!a.approx_eq(&Matrix::zeros(2, 1)));
    }

    #[test]
    fn pseudo_random_is_reproducible() {
        let a = Matrix::pseudo_random(5, 5, 7);
        assert_eq!(a, Matrix::pseudo_random(5, 5, 7));
        assert_ne!(a, Matrix::pseudo_random(5, 5, 8));
        assert!(a.as_slice().iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn serial_matches_naive() {
        let a = Matrix::pseudo_random(23, 17, 1);
        let b = Matrix::pseudo_random(17, 9, 2);
        let expected = naive_multiply(&a, &b).unwrap();
        for parts in [1, 4, 8, 40] {
            let got = serial_multiply(&a, &b, parts, &naive_multiply).unwrap();
            assert!(got.approx_eq(&expected), "parts = {parts}");
        }
    }

    #[test]
    fn shared_result_rejects_overlap_and_out_of_bounds() {
        let result = SharedResult::new(4, 2);
        result.write_rows(0, &Matrix::counting(2, 2)).unwrap();
        assert_eq!(
            result.write_rows(1, &Matrix::counting(2, 2)),
            Err(PipeError::RegionOverlap(1))
        );
        assert!(matches!(
            result.write_rows(3, &Matrix::counting(2, 2)),
            Err(PipeError::RegionOutOfBounds { start: 3, end: 5, rows: 4 })
        ));
        assert_eq!(result.rows_written(), 2);
        assert_eq!(
            result.into_matrix(),
            Err(PipeError::IncompleteResult { missing: 2 })
        );
    }

    #[test]
    fn failed_overlap_releases_partial_claims() {
        let result = SharedResult::new(3, 1);
        result.write_rows(2, &Matrix::counting(1, 1)).unwrap();
        assert!(result.write_rows(0, &Matrix::counting(3, 1)).is_err());
        assert_eq!(result.rows_written(), 1);
        result.write_rows(0, &Matrix::counting(2, 1)).unwrap();
        assert_eq!(result.into_matrix().unwrap().as_slice(), &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn disjoint_writers_from_many_threads() {
        let result = Arc::new(SharedResult::new(64, 3));
        let handles: Vec<_> = Partitioner::new(8)
            .unwrap()
            .split(64)
            .into_iter()
            .map(|rows| {
                let result = Arc::clone(&result);
                thread::spawn(move || {
                    let block = Matrix::from_fn(rows.len(), 3, |r, _| (rows.start + r) as f64);
                    result.write_rows(rows.start, &block)
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        let result = Arc::try_unwrap(result).unwrap().into_matrix().unwrap();
        assert_eq!(result.get(63, 2), Some(63.0));
    }

    #[test]
    fn parallel_matches_serial() {
        let a = Matrix::pseudo_random(37, 20, 3);
        let b = Matrix::pseudo_random(20, 11, 4);
        let config = PipelineConfig::new(2, 2, 5).unwrap();
        let (got, report) = parallel_multiply(&a, &b, config, &naive_multiply).unwrap();
        assert!(got.approx_eq(&naive_multiply(&a, &b).unwrap()));
        assert_eq!(report.produced(), 5);
        assert_eq!(report.processed(), 5);
    }

    #[test]
    fn more_producers_than_chunks() {
        let a = Matrix::counting(2, 2);
        let b = Matrix::identity(2);
        let config = PipelineConfig::new(1, 4, 1).unwrap();
        let (got, report) = parallel_multiply(&a, &b, config, &naive_multiply).unwrap();
        assert_eq!(got, a);
        assert_eq!(report.producers.len(), 4);
        assert_eq!(report.produced(), 1);
    }

    #[test]
    fn failing_multiply_leaves_result_incomplete() {
        let a = Matrix::counting(8, 2);
        let b = Matrix::identity(2);
        let config = PipelineConfig::new(2, 1, 4).unwrap();
        let flaky = |chunk: &Matrix, rhs: &Matrix| {
            if chunk.get(0, 0) == Some(0.0) {
                return Err(PipeError::HandlerFailure("first chunk".to_string()));
            }
            naive_multiply(chunk, rhs)
        };
        assert_eq!(
            parallel_multiply(&a, &b, config, &flaky).map(|(m, _)| m),
            Err(PipeError::IncompleteResult { missing: 2 })
        );
    }

    #[test]
    fn compare_reports_correct_run() {
        let a = Matrix::pseudo_random(30, 30, 5);
        let b = Matrix::pseudo_random(30, 30, 6);
        let config = PipelineConfig::new(2, 1, 3).unwrap();
        let report = compare(&a, &b, config, &naive_multiply).unwrap();
        assert!(report.correct);
        assert!(report.speedup >= 0.0);
    }
}
