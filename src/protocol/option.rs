//! The trailing option map of a Forward frame.

use rmpv::Value;

use crate::{codec::ProtocolError, event::ChunkId};

/// Compression applied to a packed entry stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed (`"text"`).
    Text,
    /// Gzip, possibly multi-member (`"gzip"`).
    Gzip,
}

impl Compression {
    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Gzip => "gzip",
        }
    }
}

/// Options sent after the payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForwardOption {
    /// Chunk id requesting acknowledgement.
    pub chunk: Option<ChunkId>,
    /// Number of entries claimed by the sender. Informational only.
    pub size: Option<u64>,
    /// Compression of a packed entry stream.
    pub compressed: Option<Compression>,
}

impl ForwardOption {
    /// Parse the option element; `nil` and absence both mean no options.
    pub(crate) fn from_value(value: Option<Value>) -> Result<Self, ProtocolError> {
        let entries = match value {
            None | Some(Value::Nil) => return Ok(Self::default()),
            Some(Value::Map(entries)) => entries,
            Some(_) => return Err(ProtocolError::InvalidOption("option is not a map")),
        };

        let mut option = Self::default();
        for (key, value) in entries {
            match key.as_str() {
                Some("chunk") => option.chunk = Some(parse_chunk(value)?),
                Some("size") => {
                    option.size = Some(
                        value
                            .as_u64()
                            .ok_or(ProtocolError::InvalidOption("size is not an unsigned integer"))?,
                    );
                }
                Some("compressed") => option.compressed = Some(parse_compression(&value)?),
                // Unknown options are reserved for protocol extensions.
                _ => {}
            }
        }
        Ok(option)
    }

    /// Encode as a map, or `None` when there is nothing to send.
    pub(crate) fn to_value(&self) -> Option<Value> {
        let mut entries = Vec::new();
        if let Some(chunk) = &self.chunk {
            let value = match std::str::from_utf8(chunk.as_bytes()) {
                Ok(s) => Value::from(s),
                Err(_) => Value::Binary(chunk.as_bytes().to_vec()),
            };
            entries.push((Value::from("chunk"), value));
        }
        if let Some(size) = self.size {
            entries.push((Value::from("size"), Value::from(size)));
        }
        if let Some(compressed) = self.compressed {
            entries.push((Value::from("compressed"), Value::from(compressed.as_str())));
        }
        (!entries.is_empty()).then_some(Value::Map(entries))
    }
}

fn parse_chunk(value: Value) -> Result<ChunkId, ProtocolError> {
    match value {
        Value::String(s) => Ok(ChunkId::new(s.into_bytes())),
        Value::Binary(b) => Ok(ChunkId::new(b)),
        _ => Err(ProtocolError::InvalidOption("chunk is not a string")),
    }
}

fn parse_compression(value: &Value) -> Result<Compression, ProtocolError> {
    match value.as_str() {
        Some("gzip") => Ok(Compression::Gzip),
        Some("text") => Ok(Compression::Text),
        Some(other) => Err(ProtocolError::UnsupportedCompression(other.to_owned())),
        None => Err(ProtocolError::InvalidOption("compressed is not a string")),
    }
}
