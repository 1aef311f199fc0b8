//! Minimal raster surface consumed by the engine.
//!
//! The full N-dimensional volume abstraction (direction matrices, typed
//! accessors, region iterators) lives outside this crate; the engine only
//! needs grid geometry, linear pixel writes and a validity test. The traits
//! here are that seam, and [`ImageRaster`] is the owned implementation used
//! for the engine's internal artifacts and by the tests.

use crate::params::{PropertyMap, PropertyValue};

/// A dense, row-major 3-D grid with physical spacing and origin in
/// millimeters. Linear index layout is `x + dims[0]*(y + dims[1]*z)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRaster<T> {
    dims: [usize; 3],
    spacing: [f64; 3],
    origin: [f64; 3],
    data: Vec<T>,
    annotations: PropertyMap,
}

impl<T: Copy + Default> ImageRaster<T> {
    pub fn new(dims: [usize; 3]) -> Self {
        Self::with_geometry(dims, [1.0, 1.0, 1.0], [0.0, 0.0, 0.0])
    }

    pub fn with_geometry(dims: [usize; 3], spacing: [f64; 3], origin: [f64; 3]) -> Self {
        let len = dims[0] * dims[1] * dims[2];
        Self {
            dims,
            spacing,
            origin,
            data: vec![T::default(); len],
            annotations: PropertyMap::default(),
        }
    }

    pub fn filled(dims: [usize; 3], value: T) -> Self {
        let mut raster = Self::new(dims);
        raster.data.fill(value);
        raster
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn linear_index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.data[self.linear_index(x, y, z)]
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) {
        let at = self.linear_index(x, y, z);
        self.data[at] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn annotations(&self) -> &PropertyMap {
        &self.annotations
    }

    pub fn annotations_mut(&mut self) -> &mut PropertyMap {
        &mut self.annotations
    }
}

/// Write access the ion image generator needs from a display raster.
pub trait RasterTarget {
    fn pixel_count(&self) -> usize;
    fn clear(&mut self);
    fn put(&mut self, linear: usize, value: f64);
    fn annotate(&mut self, key: &str, value: PropertyValue);
}

impl RasterTarget for ImageRaster<f64> {
    fn pixel_count(&self) -> usize {
        self.len()
    }

    fn clear(&mut self) {
        self.fill(0.0)
    }

    fn put(&mut self, linear: usize, value: f64) {
        self.data[linear] = value;
    }

    fn annotate(&mut self, key: &str, value: PropertyValue) {
        self.annotations.insert(key.to_string(), value);
    }
}

/// Validity test for a pixel, read-only and callable from worker threads.
pub trait MaskSource: Sync {
    fn is_valid(&self, linear: usize) -> bool;
}

impl MaskSource for ImageRaster<u8> {
    fn is_valid(&self, linear: usize) -> bool {
        self.data.get(linear).copied().unwrap_or(0) != 0
    }
}
