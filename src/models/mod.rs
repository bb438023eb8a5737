//! Core data models for search results and reference metadata.

mod reference;
mod scholar;

pub use reference::{
    Author, ExtractionRequest, ExtractionResult, ReferenceMetadata, ReferenceType, SourceKind,
    SourceValidation,
};
pub use scholar::{ScholarResult, ScholarResultBuilder, SearchOptions};

pub(crate) use scholar::clamp_unit;
