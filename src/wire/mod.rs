pub mod errors;
pub mod format;

pub use errors::DecodeError;
pub use format::{decode_frame, encode_frame, Frame, MAX_NAME_LEN};
