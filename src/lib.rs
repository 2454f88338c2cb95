#![forbid(unsafe_code)]

pub mod chroma;
pub mod encode;
pub mod error;
pub mod export;
pub mod geometry;
pub mod homography;
pub mod keyframe;
pub mod media;
pub mod preset;
pub mod renderer;
pub mod surface;

pub use chroma::{ChromaKeySpec, Rgb};
pub use error::{QuadkeyError, QuadkeyResult};
pub use export::{CancelToken, ExportGate, ExportPipeline, ExportRequest, ExportSummary, StillImage};
pub use geometry::{Corner, CornerId, Quad};
pub use keyframe::{Fps, GeometryModel, Keyframe, KeyframeTrack, QuadSource};
pub use renderer::{LayerSource, RenderRequest, RendererContext, WarpMode};
pub use surface::Surface;
