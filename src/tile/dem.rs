//! Elevation rasters (DEM data) attached to tiles
//!
//! A raster of interior size `dim` is stored with a one pixel border on every
//! side, so `stride = dim + 2`. The border lets the slope kernel sample one
//! pixel past the tile edge. It starts as a copy of the outermost interior
//! pixels and can be backfilled from neighbouring tiles.

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// How elevation is packed into RGB channels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemEncoding {
    /// `-10000 + (R * 65536 + G * 256 + B) * 0.1`
    #[default]
    Mapbox,
    /// `R * 256 + G + B / 256 - 32768`
    Terrarium,
}

impl DemEncoding {
    /// Weights applied to the 0-255 RGB values; `w` is subtracted
    pub fn unpack_vector(self) -> [f32; 4] {
        match self {
            DemEncoding::Mapbox => [6553.6, 25.6, 0.1, 10000.0],
            DemEncoding::Terrarium => [256.0, 1.0, 1.0 / 256.0, 32768.0],
        }
    }

    /// Decode an RGBA texel to meters
    pub fn decode(self, texel: [u8; 4]) -> f32 {
        let u = self.unpack_vector();
        texel[0] as f32 * u[0] + texel[1] as f32 * u[1] + texel[2] as f32 * u[2] - u[3]
    }

    /// Encode meters to an opaque RGBA texel, clamping to the encodable range
    pub fn encode(self, elevation: f32) -> [u8; 4] {
        match self {
            DemEncoding::Mapbox => {
                let v = ((elevation as f64 + 10000.0) * 10.0).round().clamp(0.0, 16_777_215.0) as u32;
                [(v >> 16) as u8, (v >> 8) as u8, v as u8, 255]
            }
            DemEncoding::Terrarium => {
                let v = (elevation as f64 + 32768.0).clamp(0.0, 65535.996);
                let whole = v.floor();
                let r = (whole / 256.0).floor();
                let g = whole - r * 256.0;
                let b = ((v - whole) * 256.0).floor();
                [r as u8, g as u8, b as u8, 255]
            }
        }
    }
}

/// Per-tile elevation raster
///
/// Immutable once attached to a tile, except for border backfilling.
#[derive(Clone, Debug, PartialEq)]
pub struct ElevationRaster {
    dim: u32,
    stride: u32,
    encoding: DemEncoding,
    /// RGBA texels, `stride * stride * 4` bytes, row-major from the north-west border corner
    pixels: Vec<u8>,
}

impl ElevationRaster {
    /// Build from `dim * dim` interior RGBA texels; the border replicates the edges
    ///
    /// A zero `dim` with no data yields an empty raster, which the pipeline skips.
    pub fn from_rgba(dim: u32, encoding: DemEncoding, rgba: &[u8]) -> Result<Self> {
        let expected = dim as usize * dim as usize * 4;
        if rgba.len() != expected {
            return Err(Error::InvalidDem(format!(
                "expected {} bytes for a {}x{} raster, got {}",
                expected,
                dim,
                dim,
                rgba.len()
            )));
        }
        if dim == 0 {
            return Ok(Self::empty(encoding));
        }

        let stride = dim + 2;
        let mut raster = Self {
            dim,
            stride,
            encoding,
            pixels: vec![0; stride as usize * stride as usize * 4],
        };
        for y in 0..dim {
            let src = (y * dim * 4) as usize;
            let dst = raster.index(0, y as i32);
            raster.pixels[dst..dst + dim as usize * 4]
                .copy_from_slice(&rgba[src..src + dim as usize * 4]);
        }
        raster.replicate_border();
        Ok(raster)
    }

    /// Build from `dim * dim` interior elevations in meters
    pub fn from_elevations(dim: u32, encoding: DemEncoding, elevations: &[f32]) -> Result<Self> {
        if elevations.len() != dim as usize * dim as usize {
            return Err(Error::InvalidDem(format!(
                "expected {} elevations for a {}x{} raster, got {}",
                dim as usize * dim as usize,
                dim,
                dim,
                elevations.len()
            )));
        }
        let rgba: Vec<u8> = elevations
            .iter()
            .flat_map(|&e| encoding.encode(e))
            .collect();
        Self::from_rgba(dim, encoding, &rgba)
    }

    /// Build by evaluating `elevation(x, y)` for every texel, border included
    ///
    /// `x` and `y` range over `-1..=dim`.
    pub fn from_fn(dim: u32, encoding: DemEncoding, elevation: impl Fn(i32, i32) -> f32) -> Self {
        if dim == 0 {
            return Self::empty(encoding);
        }
        let stride = dim + 2;
        let mut raster = Self {
            dim,
            stride,
            encoding,
            pixels: vec![0; stride as usize * stride as usize * 4],
        };
        for y in -1..=dim as i32 {
            for x in -1..=dim as i32 {
                let texel = encoding.encode(elevation(x, y));
                raster.set_texel(x, y, texel);
            }
        }
        raster
    }

    fn empty(encoding: DemEncoding) -> Self {
        Self {
            dim: 0,
            stride: 0,
            encoding,
            pixels: Vec::new(),
        }
    }

    /// Interior size in pixels
    pub fn dim(&self) -> u32 {
        self.dim
    }

    /// Row length including the border
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn encoding(&self) -> DemEncoding {
        self.encoding
    }

    /// Raw RGBA texels including the border
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.dim == 0 || self.pixels.is_empty()
    }

    /// Elevation in meters at `(x, y)`, where `-1` and `dim` address the border
    pub fn get(&self, x: i32, y: i32) -> f32 {
        self.encoding.decode(self.texel(x, y))
    }

    /// Lowest and highest interior elevation
    pub fn min_max(&self) -> Option<(f32, f32)> {
        if self.is_empty() {
            return None;
        }
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for y in 0..self.dim as i32 {
            for x in 0..self.dim as i32 {
                let e = self.get(x, y);
                min = min.min(e);
                max = max.max(e);
            }
        }
        Some((min, max))
    }

    /// Copy the edge of an adjacent raster into this raster's border
    ///
    /// `(dx, dy)` is the position of `neighbor` relative to this tile, each
    /// component in `-1..=1`.
    pub fn backfill_border(&mut self, neighbor: &ElevationRaster, dx: i32, dy: i32) -> Result<()> {
        if self.dim != neighbor.dim {
            return Err(Error::InvalidDem(format!(
                "dimension mismatch: {} vs {}",
                self.dim, neighbor.dim
            )));
        }
        if !(-1..=1).contains(&dx) || !(-1..=1).contains(&dy) || (dx == 0 && dy == 0) {
            return Err(Error::InvalidDem(format!(
                "invalid neighbour offset ({}, {})",
                dx, dy
            )));
        }
        let dim = self.dim as i32;
        let (x_min, x_max) = border_span(dx, dim);
        let (y_min, y_max) = border_span(dy, dim);
        let (ox, oy) = (-dx * dim, -dy * dim);
        for y in y_min..y_max {
            for x in x_min..x_max {
                let texel = neighbor.texel(x + ox, y + oy);
                self.set_texel(x, y, texel);
            }
        }
        Ok(())
    }

    fn replicate_border(&mut self) {
        let d = self.dim as i32;
        for i in 0..d {
            let west = self.texel(0, i);
            self.set_texel(-1, i, west);
            let east = self.texel(d - 1, i);
            self.set_texel(d, i, east);
            let north = self.texel(i, 0);
            self.set_texel(i, -1, north);
            let south = self.texel(i, d - 1);
            self.set_texel(i, d, south);
        }
        let corners = [(-1, -1, 0, 0), (d, -1, d - 1, 0), (-1, d, 0, d - 1), (d, d, d - 1, d - 1)];
        for (x, y, sx, sy) in corners {
            let texel = self.texel(sx, sy);
            self.set_texel(x, y, texel);
        }
    }

    fn index(&self, x: i32, y: i32) -> usize {
        debug_assert!(x >= -1 && y >= -1 && x <= self.dim as i32 && y <= self.dim as i32);
        ((y + 1) as usize * self.stride as usize + (x + 1) as usize) * 4
    }

    fn texel(&self, x: i32, y: i32) -> [u8; 4] {
        let i = self.index(x, y);
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]]
    }

    fn set_texel(&mut self, x: i32, y: i32, texel: [u8; 4]) {
        let i = self.index(x, y);
        self.pixels[i..i + 4].copy_from_slice(&texel);
    }
}

/// Range of border coordinates touched along one axis for a neighbour offset
fn border_span(offset: i32, dim: i32) -> (i32, i32) {
    match offset {
        -1 => (-1, 0),
        1 => (dim, dim + 1),
        _ => (0, dim),
    }
}
