//! Shared unit-quad geometry
//!
//! Every tile is drawn with the same four vertices spanning `0..EXTENT` in
//! tile units; the per-tile matrix places the quad on screen.

use bytemuck::{Pod, Zeroable};

/// Tile extent in vertex units
pub const EXTENT: i16 = 8192;

/// Quad vertex: position and texture position, both in tile units
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct RasterBoundsVertex {
    pub pos: [i16; 2],
    pub texture_pos: [i16; 2],
}

impl RasterBoundsVertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Sint16x2, 1 => Sint16x2];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Range of the index buffer drawn for one segment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
}

/// Vertex and index buffers shared by every tile draw
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuadGeometry {
    pub vertices: [RasterBoundsVertex; 4],
    pub indices: [u16; 6],
    pub segments: Vec<Segment>,
}

impl QuadGeometry {
    /// Quad covering the full tile, two triangles
    pub fn unit_quad() -> Self {
        let v = |x: i16, y: i16| RasterBoundsVertex {
            pos: [x, y],
            texture_pos: [x, y],
        };
        Self {
            vertices: [v(0, 0), v(EXTENT, 0), v(0, EXTENT), v(EXTENT, EXTENT)],
            indices: [0, 1, 2, 1, 2, 3],
            segments: vec![Segment {
                first_index: 0,
                index_count: 6,
                base_vertex: 0,
            }],
        }
    }

    /// Triangles as vertex index triples
    pub fn triangles(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        self.segments.iter().flat_map(move |segment| {
            let start = segment.first_index as usize;
            let end = start + segment.index_count as usize;
            self.indices[start..end].chunks_exact(3).map(move |tri| {
                let at = |i: u16| (i as i64 + segment.base_vertex as i64) as usize;
                [at(tri[0]), at(tri[1]), at(tri[2])]
            })
        })
    }
}

impl Default for QuadGeometry {
    fn default() -> Self {
        Self::unit_quad()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_quad_triangles() {
        let quad = QuadGeometry::unit_quad();
        let tris: Vec<_> = quad.triangles().collect();
        assert_eq!(tris, vec![[0, 1, 2], [1, 2, 3]]);
    }

    #[test]
    fn test_vertex_layout_matches_size() {
        assert_eq!(std::mem::size_of::<RasterBoundsVertex>(), 8);
        assert_eq!(RasterBoundsVertex::layout().array_stride, 8);
    }
}
