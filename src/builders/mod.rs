//! Tree construction: detector output to blocks, then structural grouping.

pub mod document;
pub mod structure;

pub use document::{
    build_document, DocumentInput, EquationRecognition, FormField, FormRecognition, LayoutBox,
    LayoutResult, PageInput, ProviderLine, ProviderSpan, Recognitions, RecognizedCell,
    TableRecognition, TextFragment,
};
pub use structure::StructureBuilder;
