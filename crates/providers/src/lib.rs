//! LLM provider plumbing: request shapes, response parsing, and the
//! retrying HTTP client used to reach the three upstream services.

pub mod adapter;
pub mod anthropic;
pub mod client;
pub mod gemini;
pub mod openai;
pub mod router;

pub use adapter::{build_request, extract_text, LlmRequest, ProviderConfig, RequestOptions};
pub use client::{LlmHttpClient, RetryPolicy};
pub use router::ProviderRouter;
