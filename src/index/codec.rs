// Binary encoding for every value type persisted in a table

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use super::{DictionaryEntries, DictionaryEntry, EntityRecord, Location};

pub type CodecResult<T> = std::result::Result<T, bincode::Error>;

/// Lossless conversion to and from stored bytes.
///
/// `T::decode(&t.encode()?)` must equal `t` for every value, and equal
/// values must encode to equal bytes.
pub trait Codec: Sized {
    fn encode(&self) -> CodecResult<Vec<u8>>;
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

/// Fixed-width big-endian integers keep encoded keys in numeric order.
fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

fn encode_serde<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    options().serialize(value)
}

fn decode_serde<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    options().deserialize(bytes)
}

/// Raw byte arrays are stored verbatim.
impl Codec for Vec<u8> {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        Ok(self.clone())
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Ok(bytes.to_vec())
    }
}

impl Codec for Location {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        Ok(self.to_key().to_vec())
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Location::from_key(bytes).ok_or_else(|| {
            Box::new(bincode::ErrorKind::Custom(format!(
                "location needs {} bytes, got {}",
                Location::KEY_LEN,
                bytes.len()
            )))
        })
    }
}

macro_rules! serde_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Codec for $ty {
                fn encode(&self) -> CodecResult<Vec<u8>> {
                    encode_serde(self)
                }

                fn decode(bytes: &[u8]) -> CodecResult<Self> {
                    decode_serde(bytes)
                }
            }
        )*
    };
}

serde_codec!(
    u32,
    u64,
    i64,
    bool,
    String,
    Vec<String>,
    Vec<Location>,
    BTreeSet<Location>,
    EntityRecord,
);

// Hash sets iterate in a per-process random order. Both are written as a
// sorted sequence, which decodes back into a set unchanged.

impl Codec for HashSet<Location> {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut sorted: Vec<&Location> = self.iter().collect();
        sorted.sort();
        encode_serde(&sorted)
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_serde(bytes)
    }
}

impl Codec for DictionaryEntries {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut sorted: Vec<&DictionaryEntry> = self.iter().collect();
        sorted.sort_by(|a, b| (&a.scope, &a.locations).cmp(&(&b.scope, &b.locations)));
        encode_serde(&sorted)
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_serde(bytes)
    }
}
