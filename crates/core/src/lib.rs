pub mod config;
pub mod geometry;
pub mod types;

pub use config::{
    DiagnosticsConfig, EnhanceConfig, ExtractorConfig, GeometryConfig, PipelineConfig, Profile,
    ProfileSettings, RegionDetectConfig,
};
pub use geometry::{BoundingBox, SearchDirection};
pub use types::{
    ExtractedField, ImageType, PassOrigin, ProcessingStatus, Provenance, QualityCategory,
    RecognizedWord, SpatialRule,
};
