// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Dynamic type descriptions and their on-disk collection.
//!
//! A recorded file carries an attachment with every registered type's
//! serialized identifier and object, so a reader can reconstruct types
//! that were discovered at runtime. The identifier and object blobs are
//! opaque to this crate; they are produced upstream by the DDS type
//! system.

use std::collections::BTreeMap;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::core::{RecorderError, Result};

/// Name of the attachment carrying the dynamic types collection.
pub const DYNAMIC_TYPES_ATTACHMENT_NAME: &str = "dynamic_types";

/// Schema text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaEncoding {
    /// OMG IDL (.idl)
    Idl,
    /// ROS 2 message definition (.msg)
    Ros2Msg,
}

impl SchemaEncoding {
    /// MCAP schema-encoding tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaEncoding::Idl => "omgidl",
            SchemaEncoding::Ros2Msg => "ros2msg",
        }
    }
}

/// A runtime-discovered type, as handed to the handler by the pipe.
#[derive(Debug, Clone)]
pub struct DynamicType {
    /// Fully qualified type name
    pub name: String,
    /// Encoding of the textual definition
    pub encoding: SchemaEncoding,
    /// Textual schema body
    pub definition: String,
    /// Opaque serialized type object
    pub type_object: Vec<u8>,
}

impl DynamicType {
    /// Create a dynamic type.
    pub fn new(
        name: impl Into<String>,
        encoding: SchemaEncoding,
        definition: impl Into<String>,
        type_object: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            encoding,
            definition: definition.into(),
            type_object,
        }
    }
}

/// Opaque serialized type identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeIdentifier(pub Vec<u8>);

/// One entry of the dynamic types collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicTypeEntry {
    /// Serialized type identifier
    pub identifier: Vec<u8>,
    /// Serialized type object
    pub object: Vec<u8>,
}

/// Collection of all registered types, serialized into the
/// `dynamic_types` attachment at file close.
///
/// Entries are keyed by type name and kept ordered so the serialized
/// blob is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicTypesCollection {
    types: BTreeMap<String, DynamicTypeEntry>,
}

impl DynamicTypesCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `type_name`.
    pub fn store(&mut self, type_name: &str, identifier: Vec<u8>, object: Vec<u8>) {
        self.types.insert(
            type_name.to_string(),
            DynamicTypeEntry { identifier, object },
        );
    }

    /// Number of stored types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Get the entry for `type_name`.
    pub fn get(&self, type_name: &str) -> Option<&DynamicTypeEntry> {
        self.types.get(type_name)
    }

    /// Serialize the collection into the attachment payload.
    ///
    /// Layout: entry count (u32), then per entry the name, identifier,
    /// and object, each u32-length prefixed.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(self.types.len() as u32).to_le_bytes());
        for (name, entry) in &self.types {
            write_blob(&mut bytes, name.as_bytes());
            write_blob(&mut bytes, &entry.identifier);
            write_blob(&mut bytes, &entry.object);
        }
        bytes
    }

    /// Deserialize an attachment payload back into a collection.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let count = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| deserialize_err(format!("entry count: {e}")))?;

        let mut types = BTreeMap::new();
        for _ in 0..count {
            let name_bytes = read_blob(&mut cursor)?;
            let name = String::from_utf8(name_bytes)
                .map_err(|e| deserialize_err(format!("type name not UTF-8: {e}")))?;
            let identifier = read_blob(&mut cursor)?;
            let object = read_blob(&mut cursor)?;
            types.insert(name, DynamicTypeEntry { identifier, object });
        }
        Ok(Self { types })
    }
}

fn write_blob(bytes: &mut Vec<u8>, blob: &[u8]) {
    bytes.extend_from_slice(&(blob.len() as u32).to_le_bytes());
    bytes.extend_from_slice(blob);
}

fn read_blob(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| deserialize_err(format!("blob length: {e}")))? as usize;

    let start = cursor.position() as usize;
    let data = *cursor.get_ref();
    if start + len > data.len() {
        return Err(deserialize_err(format!(
            "blob of {len} bytes exceeds remaining {}",
            data.len() - start
        )));
    }
    cursor.set_position((start + len) as u64);
    Ok(data[start..start + len].to_vec())
}

fn deserialize_err(message: String) -> RecorderError {
    RecorderError::inconsistency("DynamicTypesCollection", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_serialize_roundtrip() {
        let mut collection = DynamicTypesCollection::new();
        collection.store("pkg::A", vec![1, 2], vec![3, 4, 5]);
        collection.store("pkg::B", vec![6], vec![]);

        let bytes = collection.serialize();
        let restored = DynamicTypesCollection::deserialize(&bytes).unwrap();
        assert_eq!(restored, collection);
        assert_eq!(restored.get("pkg::A").unwrap().identifier, vec![1, 2]);
        assert_eq!(restored.get("pkg::B").unwrap().object, Vec::<u8>::new());
    }

    #[test]
    fn test_store_replaces() {
        let mut collection = DynamicTypesCollection::new();
        collection.store("pkg::A", vec![1], vec![2]);
        collection.store("pkg::A", vec![9], vec![8]);
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.get("pkg::A").unwrap().identifier, vec![9]);
    }

    #[test]
    fn test_serialize_deterministic() {
        let mut a = DynamicTypesCollection::new();
        a.store("z", vec![1], vec![1]);
        a.store("a", vec![2], vec![2]);

        let mut b = DynamicTypesCollection::new();
        b.store("a", vec![2], vec![2]);
        b.store("z", vec![1], vec![1]);

        assert_eq!(a.serialize(), b.serialize());
    }

    #[test]
    fn test_deserialize_truncated() {
        let mut collection = DynamicTypesCollection::new();
        collection.store("pkg::A", vec![1, 2, 3], vec![4]);
        let bytes = collection.serialize();
        let err = DynamicTypesCollection::deserialize(&bytes[..bytes.len() - 2]);
        assert!(err.is_err());
    }

    #[test]
    fn test_schema_encoding_tags() {
        assert_eq!(SchemaEncoding::Idl.as_str(), "omgidl");
        assert_eq!(SchemaEncoding::Ros2Msg.as_str(), "ros2msg");
    }
}
