//! Dense vectors and matrices, lookup tables, and the prior-loss PDFs.
//!
//! Grounded on the shape of `volt-bus`'s raw-array vector ops
//! (`similarity`/`permute`/`bind` over `[f32; SLOT_DIM]`) generalized to
//! runtime-sized rows, and on `volt-core`'s doc-tested-constant style for
//! the lookup table sizes.

use std::cell::UnsafeCell;
use std::io::{self, Read, Write};
use std::sync::Arc;

use rand::Rng;
use rand_distr::{Beta, Distribution, StandardNormal};

use tempovec_core::{LOG_TABLE_SIZE, MAX_SIGMOID, SIGMOID_TABLE_SIZE};

/// A contiguous, owned vector of `dim` floats. Used as per-worker scratch
/// (`hidden`, `grad`) — never shared across threads.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    pub fn new(dim: usize) -> Self {
        Self {
            data: vec![0.0; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn zero(&mut self) {
        self.data.iter_mut().for_each(|x| *x = 0.0);
    }

    /// `self *= a`
    pub fn mul(&mut self, a: f32) {
        self.data.iter_mut().for_each(|x| *x *= a);
    }

    /// `self += a * other`
    pub fn add_vector(&mut self, other: &Vector, a: f32) {
        debug_assert_eq!(self.data.len(), other.data.len());
        for (x, y) in self.data.iter_mut().zip(other.data.iter()) {
            *x += a * y;
        }
    }

    pub fn dot(&self, other: &Vector) -> f32 {
        debug_assert_eq!(self.data.len(), other.data.len());
        self.data.iter().zip(other.data.iter()).map(|(x, y)| x * y).sum()
    }

    pub fn save<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&(self.data.len() as i64).to_le_bytes())?;
        for v in &self.data {
            out.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn load<R: Read>(input: &mut R) -> io::Result<Self> {
        let mut len_buf = [0u8; 8];
        input.read_exact(&mut len_buf)?;
        let len = i64::from_le_bytes(len_buf) as usize;
        let mut data = Vec::with_capacity(len);
        let mut f_buf = [0u8; 4];
        for _ in 0..len {
            input.read_exact(&mut f_buf)?;
            data.push(f32::from_le_bytes(f_buf));
        }
        Ok(Self { data })
    }
}

/// An owned, single-writer `m x n` row-major matrix.
///
/// Used for matrices that are not concurrently mutated: a pretrained-vector
/// buffer on load, or a post-training snapshot taken for persistence.
/// Concurrently-mutated parameter tables use [`SharedMatrix`] instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    m: usize,
    n: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn new(m: usize, n: usize) -> Self {
        Self {
            m,
            n,
            data: vec![0.0; m * n],
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.m, self.n)
    }

    pub fn zero(&mut self) {
        self.data.iter_mut().for_each(|x| *x = 0.0);
    }

    /// Fills every cell with an independent draw from `Uniform(-a, a)`.
    pub fn uniform(&mut self, a: f32, rng: &mut impl Rng) {
        for x in self.data.iter_mut() {
            *x = rng.random_range(-a..a);
        }
    }

    /// Fills every cell with an independent draw from the standard normal.
    pub fn mul_var_normal(&mut self, rng: &mut impl Rng) {
        for x in self.data.iter_mut() {
            *x = StandardNormal.sample(rng);
        }
    }

    /// Fills column `j` with an independent `Beta(a[j], b[j])` draw per row.
    ///
    /// Grounded on `matrix.cc::beta`'s column-wise Beta sampling used to
    /// initialize the theta gate.
    pub fn beta_columns(&mut self, a: &[f32], b: &[f32], rng: &mut impl Rng) {
        assert_eq!(a.len(), b.len());
        assert_eq!(a.len(), self.n);
        for j in 0..self.n {
            let dist = Beta::new(a[j] as f64, b[j] as f64)
                .expect("beta_base and offset weights are always positive");
            for i in 0..self.m {
                self.data[i * self.n + j] = dist.sample(rng) as f32;
            }
        }
    }

    /// `M[i,:] += a * v`
    pub fn add_row(&mut self, v: &Vector, i: usize, a: f32) {
        debug_assert_eq!(v.dim(), self.n);
        let row = &mut self.data[i * self.n..(i + 1) * self.n];
        for (x, y) in row.iter_mut().zip(v.as_slice()) {
            *x += a * y;
        }
    }

    /// `<M[i,:], v>`
    pub fn dot_row(&self, v: &Vector, i: usize) -> f32 {
        debug_assert_eq!(v.dim(), self.n);
        let row = &self.data[i * self.n..(i + 1) * self.n];
        row.iter().zip(v.as_slice()).map(|(x, y)| x * y).sum()
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    /// `M[i,j]`. Uses `i*n + j` indexing (see DESIGN.md, Open Question 2).
    pub fn get_cell(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.n + j]
    }

    /// `M[i,j] = value`. Uses `i*n + j` indexing (see DESIGN.md, Open Question 2).
    pub fn update_cell(&mut self, i: usize, j: usize, value: f32) {
        self.data[i * self.n + j] = value;
    }

    pub fn save<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&(self.m as i64).to_le_bytes())?;
        out.write_all(&(self.n as i64).to_le_bytes())?;
        for v in &self.data {
            out.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn load<R: Read>(input: &mut R) -> io::Result<Self> {
        let mut buf8 = [0u8; 8];
        input.read_exact(&mut buf8)?;
        let m = i64::from_le_bytes(buf8) as usize;
        input.read_exact(&mut buf8)?;
        let n = i64::from_le_bytes(buf8) as usize;
        let mut data = Vec::with_capacity(m * n);
        let mut buf4 = [0u8; 4];
        for _ in 0..(m * n) {
            input.read_exact(&mut buf4)?;
            data.push(f32::from_le_bytes(buf4));
        }
        Ok(Self { m, n, data })
    }
}

/// A jointly-borrowed, Hogwild-mutated parameter matrix.
///
/// Shared across worker threads for the duration of training with no
/// locking. Concurrent writes to the same cell race on purpose — this is
/// the "tolerated races on parameter cells" discipline the source relies
/// on. Cells live behind [`UnsafeCell`] rather than a type that merely
/// *looks* safe, so the raciness stays visible at every call site instead
/// of being hidden behind an innocuous-looking `&mut`.
pub struct RawMatrix {
    m: usize,
    n: usize,
    data: Box<[UnsafeCell<f32>]>,
}

// SAFETY: every writer accepts torn/interleaved writes to the same cell as
// part of the Hogwild discipline documented in DESIGN.md; no reader relies
// on cross-thread happens-before ordering for correctness.
unsafe impl Sync for RawMatrix {}
unsafe impl Send for RawMatrix {}

#[derive(Clone)]
pub struct SharedMatrix(Arc<RawMatrix>);

impl SharedMatrix {
    /// Takes ownership of an already-initialized [`Matrix`] and makes it
    /// shareable across workers. Called once, before any worker spawns.
    pub fn from_matrix(matrix: Matrix) -> Self {
        let data: Box<[UnsafeCell<f32>]> =
            matrix.data.into_iter().map(UnsafeCell::new).collect();
        Self(Arc::new(RawMatrix {
            m: matrix.m,
            n: matrix.n,
            data,
        }))
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.0.m, self.0.n)
    }

    fn cell(&self, i: usize, j: usize) -> *mut f32 {
        debug_assert!(i < self.0.m && j < self.0.n);
        self.0.data[i * self.0.n + j].get()
    }

    /// `M[i,:] += a * v`, raced against any concurrent writer of the same row.
    pub fn add_row(&self, v: &Vector, i: usize, a: f32) {
        debug_assert_eq!(v.dim(), self.0.n);
        for (j, y) in v.as_slice().iter().enumerate() {
            let ptr = self.cell(i, j);
            // SAFETY: in-bounds by construction; racy read-modify-write is
            // the documented Hogwild contract.
            unsafe {
                *ptr += a * y;
            }
        }
    }

    pub fn dot_row(&self, v: &Vector, i: usize) -> f32 {
        debug_assert_eq!(v.dim(), self.0.n);
        let mut acc = 0.0f32;
        for (j, y) in v.as_slice().iter().enumerate() {
            let ptr = self.cell(i, j);
            // SAFETY: in-bounds; a single racy load is acceptable here.
            let x = unsafe { *ptr };
            acc += x * y;
        }
        acc
    }

    /// `out += a * self[i,:]` — the mirror of [`Self::add_row`], used when
    /// accumulating a matrix row into a private scratch vector (e.g.
    /// `grad += alpha * W_out[target,:]`) rather than writing into the
    /// shared matrix itself.
    pub fn add_row_to(&self, out: &mut Vector, i: usize, a: f32) {
        debug_assert_eq!(out.dim(), self.0.n);
        for j in 0..self.0.n {
            let ptr = self.cell(i, j);
            // SAFETY: in-bounds; a single racy load is acceptable here.
            let x = unsafe { *ptr };
            out.as_mut_slice()[j] += a * x;
        }
    }

    pub fn row_copy(&self, i: usize) -> Vector {
        let n = self.0.n;
        let mut out = Vector::new(n);
        for j in 0..n {
            out.data[j] = unsafe { *self.cell(i, j) };
        }
        out
    }

    pub fn get_cell(&self, i: usize, j: usize) -> f32 {
        unsafe { *self.cell(i, j) }
    }

    pub fn update_cell(&self, i: usize, j: usize, value: f32) {
        unsafe {
            *self.cell(i, j) = value;
        }
    }

    /// Reads the whole matrix out into an owned, non-shared snapshot.
    /// Only safe to call once all workers have joined.
    pub fn snapshot(&self) -> Matrix {
        let m = self.0.m;
        let n = self.0.n;
        let mut data = Vec::with_capacity(m * n);
        for cell in self.0.data.iter() {
            data.push(unsafe { *cell.get() });
        }
        Matrix { m, n, data }
    }
}

/// Cached `sigmoid`/`log` lookup tables, built once and read-only during
/// training.
pub struct Tables {
    sigmoid: Vec<f32>,
    log: Vec<f32>,
}

impl Tables {
    pub fn new() -> Self {
        let sigmoid = (0..=SIGMOID_TABLE_SIZE)
            .map(|i| {
                let x = (i as f64 / SIGMOID_TABLE_SIZE as f64) * 2.0 * MAX_SIGMOID - MAX_SIGMOID;
                (1.0 / (1.0 + (-x).exp())) as f32
            })
            .collect();
        let log = (0..=LOG_TABLE_SIZE)
            .map(|i| {
                let x = (i as f64 + 1e-5) / LOG_TABLE_SIZE as f64;
                x.ln() as f32
            })
            .collect();
        Self { sigmoid, log }
    }

    /// Saturating lookup of `sigmoid(x)`.
    pub fn sigmoid(&self, x: f32) -> f32 {
        if x < -(MAX_SIGMOID as f32) {
            0.0
        } else if x > MAX_SIGMOID as f32 {
            1.0
        } else {
            let idx = ((x as f64 + MAX_SIGMOID) * (SIGMOID_TABLE_SIZE as f64 / (2.0 * MAX_SIGMOID)))
                as usize;
            self.sigmoid[idx.min(SIGMOID_TABLE_SIZE)]
        }
    }

    /// Saturating lookup of `ln(x)`. `x > 1` returns 0.
    pub fn log(&self, x: f32) -> f32 {
        if x >= 1.0 {
            return 0.0;
        }
        let idx = (x as f64 * LOG_TABLE_SIZE as f64) as usize;
        self.log[idx.min(LOG_TABLE_SIZE)]
    }
}

impl Default for Tables {
    fn default() -> Self {
        Self::new()
    }
}

/// `N(v; 0, I)` density, used only for loss reporting (never for gradients).
pub fn mvn_pdf(v: &Vector) -> f64 {
    let dim = v.dim() as f64;
    let sq_norm: f64 = v.as_slice().iter().map(|x| (*x as f64) * (*x as f64)).sum();
    (-0.5 * sq_norm).exp() / (2.0 * std::f64::consts::PI).powf(dim / 2.0)
}

/// `Beta(x; a, b)` density, used only for loss reporting.
pub fn beta_pdf(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 || x >= 1.0 {
        return 0.0;
    }
    let ln_beta = ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b);
    ((a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln() - ln_beta).exp()
}

/// Stirling-series log-gamma, accurate enough for loss reporting.
fn ln_gamma(x: f64) -> f64 {
    const COF: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5 - (x + 0.5) * (x + 5.5).ln();
    let mut ser = 1.000000000190015;
    for c in COF {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn vector_dot_and_scale() {
        let mut a = Vector::new(3);
        a.as_mut_slice().copy_from_slice(&[1.0, 2.0, 3.0]);
        let mut b = Vector::new(3);
        b.as_mut_slice().copy_from_slice(&[4.0, 5.0, 6.0]);
        assert_eq!(a.dot(&b), 32.0);
        a.mul(2.0);
        assert_eq!(a.as_slice(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn matrix_row_ops_use_i_times_n_stride() {
        let mut m = Matrix::new(2, 3);
        let mut v = Vector::new(3);
        v.as_mut_slice().copy_from_slice(&[1.0, 1.0, 1.0]);
        m.add_row(&v, 1, 2.0);
        assert_eq!(m.get_cell(1, 0), 2.0);
        assert_eq!(m.get_cell(0, 0), 0.0);
    }

    #[test]
    fn shared_matrix_round_trips_through_snapshot() {
        let mut owned = Matrix::new(4, 2);
        owned.update_cell(3, 1, 9.5);
        let shared = SharedMatrix::from_matrix(owned);
        shared.update_cell(0, 0, 1.25);
        let snap = shared.snapshot();
        assert_eq!(snap.get_cell(3, 1), 9.5);
        assert_eq!(snap.get_cell(0, 0), 1.25);
    }

    #[test]
    fn sigmoid_table_saturates_outside_bounds() {
        let tables = Tables::new();
        assert_eq!(tables.sigmoid(-100.0), 0.0);
        assert_eq!(tables.sigmoid(100.0), 1.0);
        assert!((tables.sigmoid(0.0) - 0.5).abs() < 0.02);
    }

    #[test]
    fn log_table_returns_zero_above_one() {
        let tables = Tables::new();
        assert_eq!(tables.log(1.0), 0.0);
        assert_eq!(tables.log(2.0), 0.0);
        assert!(tables.log(0.5) < 0.0);
    }

    #[test]
    fn beta_columns_respect_shape() {
        let mut m = Matrix::new(5, 3);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        m.beta_columns(&[1.0, 2.0, 3.0], &[10.0, 10.0, 10.0], &mut rng);
        for j in 0..3 {
            for i in 0..5 {
                let cell = m.get_cell(i, j);
                assert!(cell > 0.0 && cell < 1.0);
            }
        }
    }
}
