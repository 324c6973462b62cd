mod annotator;
mod gemini;
mod preprocess;

pub use annotator::{parse_annotation, AnnotateError, KeywordAnnotator};
pub use gemini::{GeminiClient, GenerationRequest, TextGenerator};
pub use preprocess::Preprocessor;
