//! LLSD structured documents.
//!
//! [`LlsdValue`] is the recursive value type used for the feature document;
//! [`xml`] is its wire encoding. JSON interop goes through serde.

mod value;
pub mod xml;

pub(crate) use value::parse_bool_text;
pub use value::{LlsdMap, LlsdValue};
