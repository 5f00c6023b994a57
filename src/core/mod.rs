//! # Core Wire Components
//!
//! Packet buffers, the obfuscated header, and the tokio codecs that glue the
//! cipher pipeline to a byte stream.
//!
//! ## Wire Format
//! ```text
//! [Header(4)] [Enciphered payload(N)]
//! payload = [Opcode(2, LE)] [Body(N-2)]
//! ```
//!
//! ## Security
//! - Header version must match the configured game version or the
//!   connection is dropped
//! - Zero-length frames are rejected before any allocation

pub mod codec;
pub mod header;
pub mod packet;
