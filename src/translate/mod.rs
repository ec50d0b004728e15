//! Translation between the `OpenAI`, Anthropic and Gemini wire dialects.
//!
//! Every conversion pivots through the canonical model: inbound requests are
//! normalized into it, backend requests are materialized from it, and backend
//! replies are lifted into it before being materialized for the caller.
//! All functions here are pure (no I/O).

pub mod anthropic_types;
pub mod canonical;
pub mod detect;
pub mod gemini_types;
pub mod normalize;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;

pub use canonical::{CanonicalRequest, CanonicalResponse};

use serde::{Deserialize, Deserializer};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize a sequence element by element, dropping elements that do not
/// parse instead of failing the whole document.
pub(crate) fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping unparseable element");
                None
            }
        })
        .collect())
}
pub use detect::{detect_format, Dialect};
pub use streaming::{translate_stream, FrameStream, StreamTranslator};
