//! Tile pyramid generation.
//!
//! A pyramid is the set of progressively lower resolution tilings of one
//! source image. The highest level holds the image at full resolution and
//! level 0 is a single tile containing the whole image.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │           LocalWorkerPool / RemoteWorkerClient              │
//! │             (depend on Arc<dyn PyramidBuilder>)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PyramidBuilder Trait                       │
//! │      build(source, container) -> TilePyramidDescriptor      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//! ┌─────────────────────────┐   ┌─────────────────────────────┐
//! │   TilePyramidBuilder    │   │   test doubles counting     │
//! │  (image decode + JPEG)  │   │   invocations               │
//! └─────────────────────────┘   └─────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tileforge::pyramid::{PyramidBuilder, TilePyramidBuilder, TilingConfig};
//!
//! let builder = TilePyramidBuilder::new(TilingConfig::default());
//! let descriptor = builder.build(&source, &container)?;
//! println!("{} tiles up to zoom {}", descriptor.tile_count, descriptor.zoom_level);
//! ```

mod builder;
mod descriptor;
mod error;
mod geometry;

pub use builder::{
    locate_existing, PyramidBuilder, TilePyramidBuilder, TilingConfig, DEFAULT_JPEG_QUALITY,
    DEFAULT_TILE_SIZE,
};
pub use descriptor::TilePyramidDescriptor;
pub use error::TileError;
pub use geometry::{level_dimensions, tile_count, tiles_at_level, zoom_level_for, PyramidGeometry};
