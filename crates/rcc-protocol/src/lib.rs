//! Wire-level DTOs for the three southbound dialects RCC speaks:
//! OpenAI-compatible chat completions, Anthropic messages, and Gemini
//! generateContent. These are plain serde structs with no behavior; the
//! conversions to/from the gateway's canonical shape live in `rcc-transform`.

pub mod claude;
pub mod gemini;
pub mod iflow;
pub mod openai;
pub mod sse;
