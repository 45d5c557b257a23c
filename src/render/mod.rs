//! Hillshade rendering: slope preparation, shading and the GPU backends

pub mod context;
pub mod modes;
pub mod geometry;
pub mod frame;
pub mod uniforms;
pub mod terrain;
pub mod texture_cache;
pub mod overlap;
pub mod prepare;
pub mod shade;
pub mod hillshade;
pub mod software;
pub mod gpu;

pub use context::{RenderContext, RenderTarget, Texture, TextureFormat, Viewport};
pub use frame::{FrameState, RenderPass, TileView};
pub use gpu::WgpuContext;
pub use hillshade::{DrawStats, HillshadeRenderer};
pub use overlap::{OverlapResolver, StencilConfig};
pub use prepare::prepare_hillshade;
pub use shade::render_hillshade;
pub use software::SoftwareContext;
pub use terrain::{TerrainData, TerrainProvider};
pub use texture_cache::TextureCache;
