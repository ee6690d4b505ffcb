//! Generative AI layer: Gemini text generation behind the `TextGenerator` port.

mod gemini;
pub use gemini::GeminiClient;
