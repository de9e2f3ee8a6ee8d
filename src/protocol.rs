//! Forward protocol payload interpretation.
//!
//! A complete frame is a MessagePack array whose second element selects the
//! payload mode:
//!
//! | Mode | Shape |
//! |------|-------|
//! | Message | `[tag, time, record, option?]` |
//! | Forward | `[tag, [[time, record], ...], option?]` |
//! | `PackedForward` | `[tag, bin-or-str of concatenated [time, record], option?]` |
//! | `CompressedPackedForward` | as `PackedForward`, gzip-compressed, `compressed: "gzip"` |
//!
//! The option map may carry `chunk`, which asks the server to acknowledge
//! the frame once its events have been consumed.

mod decode;
mod encode;
mod option;

pub use decode::decode_frame;
pub use encode::{EncodeError, encode_batch};
pub use option::{Compression, ForwardOption};

/// Payload encoding of a Forward frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForwardMode {
    /// One event per frame.
    Message,
    /// An array of `[time, record]` entries.
    Forward,
    /// Entries concatenated into one binary region.
    PackedForward,
    /// Gzip-compressed packed entries.
    CompressedPackedForward,
}

impl ForwardMode {
    /// All modes, in protocol order.
    pub const ALL: [ForwardMode; 4] = [
        ForwardMode::Message,
        ForwardMode::Forward,
        ForwardMode::PackedForward,
        ForwardMode::CompressedPackedForward,
    ];
}

#[cfg(test)]
mod tests;
