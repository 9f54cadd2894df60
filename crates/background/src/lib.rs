//! Background coordination core.
//!
//! This crate wires the pieces together behind one message contract:
//! - `router`: action dispatch for UI surfaces (`{action, data}` in,
//!   `{success, data?, error?}` out)
//! - `tasks`: summarize, Q&A, flashcards, keywords, translation, templates
//! - `prompts`: prompt text for the tasks
//! - `surface`: access to the page the user is looking at

pub mod prompts;
pub mod router;
pub mod surface;
pub mod tasks;

pub use router::MessageRouter;
pub use surface::{ActiveSurface, DetachedSurfaces, PageContent, SurfaceHost};
pub use tasks::LlmGateway;
