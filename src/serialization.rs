/// Serialization format options for grid data.
///
/// Each format has both compressed (Lz4) and uncompressed variants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SerializationFormat {
    /// JSON format - human readable, larger size
    Json,
    /// JSON format with LZ4 compression
    JsonLz4,
    /// bincode format - compact binary
    Bincode,
    /// bincode format with LZ4 compression (default)
    #[default]
    BincodeLz4,
}

impl SerializationFormat {
    /// Returns true if this format uses LZ4 compression
    pub fn is_compressed(&self) -> bool {
        matches!(self, SerializationFormat::JsonLz4 | SerializationFormat::BincodeLz4)
    }
}

use crate::{errors::SGError, storage::SparseGridData};
use serde::{de::DeserializeOwned, Serialize};

/// Serialize data to bytes using the specified format, before compression.
fn serialize_serde<T: Serialize>(data: &T, format: SerializationFormat) -> Result<Vec<u8>, SGError> {
    match format {
        SerializationFormat::Json | SerializationFormat::JsonLz4 => {
            serde_json::to_vec(data).map_err(|_| SGError::SerializationFailed)
        }
        SerializationFormat::Bincode | SerializationFormat::BincodeLz4 => {
            bincode::serde::encode_to_vec(data, bincode::config::standard()).map_err(|_| SGError::SerializationFailed)
        }
    }
}

/// Deserialize data from uncompressed bytes using the specified format.
fn deserialize_serde<T: DeserializeOwned>(data: &[u8], format: SerializationFormat) -> Result<T, SGError> {
    match format {
        SerializationFormat::Json | SerializationFormat::JsonLz4 => {
            serde_json::from_slice(data).map_err(|_| SGError::DeserializationFailed)
        }
        SerializationFormat::Bincode | SerializationFormat::BincodeLz4 => {
            bincode::serde::decode_from_slice(data, bincode::config::standard())
                .map(|(value, _)| value)
                .map_err(|_| SGError::DeserializationFailed)
        }
    }
}

/// Serialize data to bytes using the specified format.
/// Applies LZ4 compression if the format variant ends with Lz4.
pub fn serialize<T: Serialize>(data: &T, format: SerializationFormat) -> Result<Vec<u8>, SGError> {
    let bytes = serialize_serde(data, format)?;
    if format.is_compressed() {
        Ok(lz4_flex::compress_prepend_size(&bytes))
    } else {
        Ok(bytes)
    }
}

/// Deserialize data from bytes using the specified format.
/// Applies LZ4 decompression if the format variant ends with Lz4.
pub fn deserialize<T: DeserializeOwned>(data: &[u8], format: SerializationFormat) -> Result<T, SGError> {
    if format.is_compressed() {
        let decompressed = lz4_flex::decompress_size_prepended(data)
            .map_err(|_| SGError::LZ4DecompressionFailed)?;
        deserialize_serde(&decompressed, format)
    } else {
        deserialize_serde(data, format)
    }
}

impl SparseGridData
{
    pub fn to_json_string(&self) -> Result<String, SGError>
    {
        serde_json::to_string(self).map_err(|_| SGError::SerializationFailed)
    }

    ///
    /// The lookup map is rebuilt while reading, so the result can be queried
    /// right away.
    ///
    pub fn from_json_str(content: &str) -> Result<Self, SGError>
    {
        serde_json::from_str(content).map_err(|_| SGError::DeserializationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{basis::base::BasisFunction, storage::GridPoint};

    fn sample_storage() -> SparseGridData {
        let mut storage = SparseGridData::with_basis(2, BasisFunction::ModLinear);
        crate::generators::regular(&mut storage, 3).unwrap();
        storage.bounding_box = crate::storage::BoundingBox::new(&[-1.0, 0.0], &[1.0, 4.0]);
        storage
    }

    fn assert_same_grid(a: &SparseGridData, b: &SparseGridData) {
        assert_eq!(a.len(), b.len());
        assert_eq!(a.basis(), b.basis());
        assert_eq!(a.bounding_box(), b.bounding_box());
        assert!(b.map_initialized());
        for seq in 0..a.len() {
            assert_eq!(b.find(&a.point(seq)), Some(seq));
            assert_eq!(a.is_leaf(seq), b.is_leaf(seq));
        }
    }

    #[test]
    fn test_storage_roundtrip_all_formats() {
        let storage = sample_storage();
        for format in [SerializationFormat::Json, SerializationFormat::JsonLz4, SerializationFormat::Bincode, SerializationFormat::BincodeLz4] {
            let bytes = serialize(&storage, format).unwrap();
            let result: SparseGridData = deserialize(&bytes, format).unwrap();
            assert_same_grid(&storage, &result);
        }
    }

    #[test]
    fn test_json_string_roundtrip() {
        let storage = sample_storage();
        let content = storage.to_json_string().unwrap();
        let mut result = SparseGridData::from_json_str(&content).unwrap();
        assert_same_grid(&storage, &result);
        // the rebuilt map keeps insertion working
        let seq = result.insert_point(GridPoint::new(&[4, 1], &[1, 1], true)).unwrap();
        assert_eq!(seq, storage.len());
    }

    #[test]
    fn test_corrupt_input() {
        assert_eq!(deserialize::<SparseGridData>(&[1, 2, 3], SerializationFormat::BincodeLz4).err(), Some(SGError::LZ4DecompressionFailed));
        assert_eq!(SparseGridData::from_json_str("{").err(), Some(SGError::DeserializationFailed));
        // index vector shorter than the point count
        let storage = sample_storage();
        let mut value: serde_json::Value = serde_json::from_str(&storage.to_json_string().unwrap()).unwrap();
        value["index"].as_array_mut().unwrap().pop();
        assert_eq!(SparseGridData::from_json_str(&value.to_string()).err(), Some(SGError::DeserializationFailed));
    }
}
