//! Dense block-matrix helpers.

use nalgebra::DMatrix;

/// Block-diagonal replication of `block`, `count` times.
///
/// ```text
/// blkdiag(X, 3) = [ X 0 0 ]
///                 [ 0 X 0 ]
///                 [ 0 0 X ]
/// ```
///
/// The copy with index `i` occupies rows `i * X.nrows()..` and columns `i * X.ncols()..`.
pub fn blkdiag(block: &DMatrix<f64>, count: usize) -> DMatrix<f64> {
    let (rows, cols) = block.shape();
    let mut result = DMatrix::zeros(rows * count, cols * count);
    for i in 0..count {
        place_block(&mut result, i * rows, i * cols, block);
    }
    result
}

/// Overwrites the sub-block of `target` starting at `(row, col)` with `block`.
///
/// # Panics
///
/// Panics if the block does not fit inside `target`.
pub fn place_block(target: &mut DMatrix<f64>, row: usize, col: usize, block: &DMatrix<f64>) {
    assert!(
        row + block.nrows() <= target.nrows() && col + block.ncols() <= target.ncols(),
        "block {:?} at ({}, {}) does not fit into {:?}",
        block.shape(),
        row,
        col,
        target.shape()
    );
    target.view_mut((row, col), block.shape()).copy_from(block);
}

/// `m^k` for a square matrix, with `m^0 = I`.
pub fn matrix_power(m: &DMatrix<f64>, k: usize) -> DMatrix<f64> {
    assert!(m.is_square(), "matrix power requires a square matrix");
    let mut result = DMatrix::identity(m.nrows(), m.ncols());
    for _ in 0..k {
        result = &result * m;
    }
    result
}

/// Sets every entry with magnitude below `threshold` to exact zero.
pub fn flush_zeros(m: &mut DMatrix<f64>, threshold: f64) {
    m.apply(|x| {
        if x.abs() < threshold {
            *x = 0.0;
        }
    });
}
