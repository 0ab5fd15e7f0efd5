pub mod claude;
pub mod gemini;
pub mod openai;

pub use claude::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiCompatibleAdapter;
