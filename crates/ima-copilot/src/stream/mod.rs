//! Answer stream decoding: UTF-8, line framing, payload shapes.

mod decoder;
mod lines;
mod shapes;
mod utf8;

pub use decoder::{DecodeStats, DecoderState, StreamDecoder};
pub use lines::{LineBuffer, StreamLine, classify as classify_line};
pub use shapes::{REFERENCES_STATUS, SEARCHING_STATUS, extract_full_response};
pub use utf8::Utf8Decoder;
