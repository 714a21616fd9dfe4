//! This module provides the array and transform helpers shared by the probe model, the
//! solvers and the postprocessing filters: 2D FFTs, zero-frequency recentering, the
//! circular flip used for adjoint convolutions, padding/cropping and an orthonormal 2D
//! discrete cosine transform.
//!
//! All transforms are unnormalized in the forward direction and scaled by `1/N` in the
//! inverse direction, so that `ifft2(fft2(x)) == x` (numpy/scipy convention).

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use num_complex::Complex32;
use num_traits::Zero;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Planned forward and inverse FFTs for one `(rows, cols)` grid.
///
/// Row and column passes are distributed over rayon's thread pool; each lane is copied
/// into a contiguous buffer, transformed and written back.
#[derive(Clone)]
pub struct Fft2d {
    rows: usize,
    cols: usize,
    row_forward: Arc<dyn Fft<f32>>,
    row_inverse: Arc<dyn Fft<f32>>,
    col_forward: Arc<dyn Fft<f32>>,
    col_inverse: Arc<dyn Fft<f32>>,
}

impl Fft2d {
    pub fn new(shape: (usize, usize)) -> Self {
        let (rows, cols) = shape;
        let mut planner = FftPlanner::<f32>::new();
        Fft2d {
            rows,
            cols,
            row_forward: planner.plan_fft_forward(cols),
            row_inverse: planner.plan_fft_inverse(cols),
            col_forward: planner.plan_fft_forward(rows),
            col_inverse: planner.plan_fft_inverse(rows),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Forward transform of a real grid.
    pub fn forward(&self, data: &ArrayView2<f32>) -> Array2<Complex32> {
        let mut spectrum = data.mapv(|v| Complex32::new(v, 0.0));
        self.forward_inplace(&mut spectrum);
        spectrum
    }

    pub fn forward_inplace(&self, data: &mut Array2<Complex32>) {
        debug_assert_eq!(data.dim(), self.shape());
        process_lanes(data, Axis(0), &self.row_forward);
        process_lanes(data, Axis(1), &self.col_forward);
    }

    /// Inverse transform including the `1/(rows·cols)` normalization.
    pub fn inverse_inplace(&self, data: &mut Array2<Complex32>) {
        debug_assert_eq!(data.dim(), self.shape());
        process_lanes(data, Axis(0), &self.row_inverse);
        process_lanes(data, Axis(1), &self.col_inverse);
        let scale = 1.0 / (self.rows * self.cols) as f32;
        data.par_mapv_inplace(|v| v * scale);
    }

    pub fn inverse(&self, spectrum: &Array2<Complex32>) -> Array2<Complex32> {
        let mut data = spectrum.clone();
        self.inverse_inplace(&mut data);
        data
    }
}

/// Applies `fft` to every 1D lane of `data` running along `axis`.
///
/// `Axis(0)` iterates over rows (each row is transformed), `Axis(1)` over columns.
fn process_lanes(data: &mut Array2<Complex32>, axis: Axis, fft: &Arc<dyn Fft<f32>>) {
    data.axis_iter_mut(axis)
        .into_par_iter()
        .for_each(|mut lane| {
            let mut buffer = lane.to_vec();
            fft.process(&mut buffer);
            lane.assign(&Array1::from(buffer));
        });
}

/// Circularly shifts a grid so that element `(i, j)` moves to `(i + shift.0, j + shift.1)`.
pub fn roll<T: Clone>(data: &ArrayView2<T>, shift: (usize, usize)) -> Array2<T> {
    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 {
        return data.to_owned();
    }
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        data[[(i + rows - shift.0 % rows) % rows, (j + cols - shift.1 % cols) % cols]].clone()
    })
}

/// Moves the zero-frequency sample from the corner to `(rows/2, cols/2)`.
pub fn fftshift<T: Clone>(data: &ArrayView2<T>) -> Array2<T> {
    let (rows, cols) = data.dim();
    roll(data, (rows / 2, cols / 2))
}

/// Inverse of [`fftshift`], also for odd sizes.
pub fn ifftshift<T: Clone>(data: &ArrayView2<T>) -> Array2<T> {
    let (rows, cols) = data.dim();
    roll(data, (rows - rows / 2, cols - cols / 2))
}

/// Circular flip: index 0 stays in place, every other index `i` maps to `n - i`.
///
/// Convolving with the circularly flipped kernel is the adjoint of convolving with the
/// kernel itself.
pub fn circular_flip<T: Clone>(data: &ArrayView2<T>) -> Array2<T> {
    let (rows, cols) = data.dim();
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        data[[(rows - i) % rows, (cols - j) % cols]].clone()
    })
}

/// Mirror index without repeating the edge sample (numpy `reflect` mode).
fn reflect_index(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut i = index.rem_euclid(period);
    if i >= len as isize {
        i = period - i;
    }
    i as usize
}

/// Pads `pad.0` rows and `pad.1` columns on both sides by mirroring the interior.
pub fn pad_reflect(data: &ArrayView2<f32>, pad: (usize, usize)) -> Array2<f32> {
    let (rows, cols) = data.dim();
    Array2::from_shape_fn((rows + 2 * pad.0, cols + 2 * pad.1), |(i, j)| {
        let src_i = reflect_index(i as isize - pad.0 as isize, rows);
        let src_j = reflect_index(j as isize - pad.1 as isize, cols);
        data[[src_i, src_j]]
    })
}

/// Pads `pad.0` rows and `pad.1` columns of zeros on both sides.
pub fn pad_zeros(data: &ArrayView2<f32>, pad: (usize, usize)) -> Array2<f32> {
    let (rows, cols) = data.dim();
    let mut padded = Array2::zeros((rows + 2 * pad.0, cols + 2 * pad.1));
    padded
        .slice_mut(s![pad.0..pad.0 + rows, pad.1..pad.1 + cols])
        .assign(data);
    padded
}

/// Removes `pad` samples from both sides of each axis.
pub fn crop(data: &ArrayView2<f32>, pad: (usize, usize)) -> Array2<f32> {
    let (rows, cols) = data.dim();
    data.slice(s![pad.0..rows - pad.0, pad.1..cols - pad.1])
        .to_owned()
}

/// Distance of every sample from the centre `(rows/2, cols/2)` of a shifted spectrum.
pub fn radius_grid(shape: (usize, usize)) -> Array2<f32> {
    let (cy, cx) = (shape.0 / 2, shape.1 / 2);
    Array2::from_shape_fn(shape, |(i, j)| {
        let dy = i as f32 - cy as f32;
        let dx = j as f32 - cx as f32;
        (dx * dx + dy * dy).sqrt()
    })
}

/// Orthonormal 1D DCT-II / DCT-III pair for one length, evaluated through a planned FFT
/// of twice the length.
#[derive(Clone)]
struct Dct1d {
    len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    twiddles: Vec<Complex32>,
}

impl Dct1d {
    fn new(len: usize, planner: &mut FftPlanner<f32>) -> Self {
        let twiddles = (0..len)
            .map(|k| Complex32::from_polar(1.0, -PI * k as f32 / (2 * len) as f32))
            .collect();
        Dct1d {
            len,
            forward: planner.plan_fft_forward(2 * len),
            inverse: planner.plan_fft_inverse(2 * len),
            twiddles,
        }
    }

    fn weight(&self, k: usize) -> f32 {
        if k == 0 {
            (1.0 / self.len as f32).sqrt()
        } else {
            (2.0 / self.len as f32).sqrt()
        }
    }

    /// DCT-II with `norm='ortho'`.
    fn dct(&self, values: &mut [f32]) {
        let n = self.len;
        let mut buffer = vec![Complex32::zero(); 2 * n];
        for (i, &v) in values.iter().enumerate() {
            buffer[i] = Complex32::new(v, 0.0);
            buffer[2 * n - 1 - i] = Complex32::new(v, 0.0);
        }
        self.forward.process(&mut buffer);
        for (k, v) in values.iter_mut().enumerate() {
            *v = 0.5 * (self.twiddles[k] * buffer[k]).re * self.weight(k);
        }
    }

    /// DCT-III with `norm='ortho'`, the inverse of [`Dct1d::dct`].
    fn idct(&self, values: &mut [f32]) {
        let n = self.len;
        let mut buffer = vec![Complex32::zero(); 2 * n];
        for (k, &v) in values.iter().enumerate() {
            buffer[k] = self.twiddles[k].conj() * (v * self.weight(k));
        }
        self.inverse.process(&mut buffer);
        for (i, v) in values.iter_mut().enumerate() {
            *v = buffer[i].re;
        }
    }
}

/// Separable orthonormal 2D DCT (type II forward, type III inverse).
#[derive(Clone)]
pub struct Dct2d {
    rows: Dct1d,
    cols: Dct1d,
}

impl Dct2d {
    pub fn new(shape: (usize, usize)) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Dct2d {
            rows: Dct1d::new(shape.0, &mut planner),
            cols: Dct1d::new(shape.1, &mut planner),
        }
    }

    pub fn forward(&self, data: &ArrayView2<f32>) -> Array2<f32> {
        let mut out = data.to_owned();
        transform_lanes(&mut out, Axis(1), |lane| self.rows.dct(lane));
        transform_lanes(&mut out, Axis(0), |lane| self.cols.dct(lane));
        out
    }

    pub fn inverse(&self, coefficients: &ArrayView2<f32>) -> Array2<f32> {
        let mut out = coefficients.to_owned();
        transform_lanes(&mut out, Axis(1), |lane| self.rows.idct(lane));
        transform_lanes(&mut out, Axis(0), |lane| self.cols.idct(lane));
        out
    }
}

fn transform_lanes<F>(data: &mut Array2<f32>, axis: Axis, transform: F)
where
    F: Fn(&mut [f32]) + Sync + Send,
{
    data.axis_iter_mut(axis)
        .into_par_iter()
        .for_each(|mut lane| {
            let mut buffer = lane.to_vec();
            transform(&mut buffer);
            lane.assign(&Array1::from(buffer));
        });
}
