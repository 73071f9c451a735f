//! Email decoding: form-data splitting, transfer encodings, header decoding,
//! nested MIME parsing, and the regex fallback parser.

pub mod encoding;
pub mod fallback;
pub mod header;
pub mod mime;
pub mod multipart;

pub use fallback::parse_fallback;
pub use mime::parse_email;
pub use multipart::split_form_data;
