pub mod defs;
pub mod empty;

pub use defs::{
    ApplyAck, BoundingBox, DocumentAdapter, FrameTrack, MaskResult, MaskSet, MeshFormat, MeshResult,
    Point,
};
pub use empty::EmptyDocument;
