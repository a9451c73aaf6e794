//! Provider-specific request bodies and response envelopes.

pub(crate) mod anthropic;
pub(crate) mod custom;
pub(crate) mod gemini;
pub(crate) mod openai;
