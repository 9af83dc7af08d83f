//! The objects passed around by the agent loop.
//!
//! Several wire formats meet here: the OpenAI-style chat messages and tools
//! sent to model providers, and the JSON-RPC tool descriptors reported by
//! tool provider processes. Both are converted to and from these internal
//! structs at the edges; the internal models are not an exact match to
//! either format.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
