//! The Serialized Property Store found in PropertyStoreDataBlock
//!
//! See [\[MS-PROPSTORE\]](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-propstore/39ea873f-7af5-44dd-92f9-bc1f293852cc)
use super::ReadVec;
use byteorder::{LE, ReadBytesExt};
use ctxole::config::Config;
use ctxole::oleps::{CP_WINUNICODE, Property, TypedPropertyValue, UnicodeString};
use ctxutils::error::{invalid, out_of_range};
use ctxutils::win32::GUID;
use serde::Serialize;
use std::io::{self, Cursor};
use tracing::*;

/// The format id of storages whose values are named by strings
pub const FMTID_STRING_NAMED: GUID = GUID::from_fields(
    0xD5CDD505,
    0x2E9C,
    0x101B,
    [0x93, 0x97, 0x08, 0x00, 0x2B, 0x2C, 0xF9, 0xAE],
);

/// The "1SPS" storage version
pub const STORAGE_VERSION: u32 = 0x53505331;

#[derive(Serialize)]
pub struct SerializedPropertyStore {
    pub storages: Vec<SerializedPropertyStorage>,
}

impl SerializedPropertyStore {
    /// Decodes the storages until the terminating zero size or the end of `slice`
    pub fn from_slice(slice: &[u8], config: &Config) -> Result<Self, io::Error> {
        let mut storages = Vec::<SerializedPropertyStorage>::new();
        let mut position = 0usize;
        while slice.len() - position >= 4 {
            let mut reader = Cursor::new(&slice[position..]);
            let storage_size = reader.read_u32::<LE>()? as usize;
            if storage_size == 0 {
                break;
            }
            if storage_size > slice.len() - position {
                return Err(out_of_range(format!(
                    "Property storage size {storage_size} exceeds the available {} bytes",
                    slice.len() - position
                )));
            }
            storages.push(SerializedPropertyStorage::from_slice(
                &slice[position..position + storage_size],
                config,
            )?);
            position += storage_size;
        }
        return Ok(Self { storages });
    }
}

#[derive(Serialize)]
pub struct SerializedPropertyStorage {
    pub storage_size: u32,
    pub version: u32,
    pub format_id: GUID,
    pub values: Vec<SerializedPropertyValue>,
}

impl SerializedPropertyStorage {
    pub const HEADER_SIZE: usize = 24;

    pub fn from_slice(slice: &[u8], config: &Config) -> Result<Self, io::Error> {
        let mut reader = Cursor::new(slice);
        let storage_size = reader.read_u32::<LE>()?;
        if (storage_size as usize) < Self::HEADER_SIZE {
            return Err(invalid(format!("Invalid property storage size {storage_size}")));
        }
        let version = reader.read_u32::<LE>()?;
        if version != STORAGE_VERSION {
            return Err(invalid(format!(
                "Invalid property storage version 0x{version:08x}"
            )));
        }
        let format_id = GUID::from_le_stream(&mut reader)?;
        let string_named = format_id == FMTID_STRING_NAMED;

        let mut values = Vec::<SerializedPropertyValue>::new();
        let mut position = Self::HEADER_SIZE;
        while slice.len() - position >= 4 {
            let mut reader = Cursor::new(&slice[position..]);
            let value_size = reader.read_u32::<LE>()? as usize;
            if value_size == 0 {
                break;
            }
            if value_size > slice.len() - position {
                return Err(out_of_range(format!(
                    "Property value size {value_size} exceeds the available {} bytes",
                    slice.len() - position
                )));
            }
            let value = SerializedPropertyValue::from_slice(
                &slice[position..position + value_size],
                string_named,
                config,
            )?;
            values.push(value);
            position += value_size;
        }
        debug!("Property storage {format_id}: {} values", values.len());
        return Ok(Self {
            storage_size,
            version,
            format_id,
            values,
        });
    }
}

/// How a value is identified within its storage
#[derive(Serialize)]
pub enum PropertyName {
    Id(u32),
    Name(UnicodeString),
}

#[derive(Serialize)]
pub struct SerializedPropertyValue {
    pub value_size: u32,
    pub name: PropertyName,
    /// The value, or the reason it could not be decoded
    pub value: Property,
}

impl SerializedPropertyValue {
    /// Decodes a value whose name is a string if `string_named` is set, an integer otherwise
    ///
    /// A value that fails to decode is kept as [`Property::Invalid`]
    pub fn from_slice(slice: &[u8], string_named: bool, config: &Config) -> Result<Self, io::Error> {
        let mut reader = Cursor::new(slice);
        let value_size = reader.read_u32::<LE>()?;
        let name = match string_named {
            true => {
                let name_size = reader.read_u32::<LE>()? as usize;
                let _reserved = reader.read_u8()?;
                let mut name = reader.read_bytes(name_size)?;
                name.truncate(name.len() & !1);
                if name.ends_with(&[0, 0]) {
                    name.truncate(name.len() - 2);
                }
                PropertyName::Name(UnicodeString { data: name })
            }
            false => {
                let id = reader.read_u32::<LE>()?;
                let _reserved = reader.read_u8()?;
                PropertyName::Id(id)
            }
        };
        let value = match TypedPropertyValue::new(&mut reader, CP_WINUNICODE, config) {
            Ok(v) => Property::TypedPropertyValue(v),
            Err(e) => {
                debug!("Failed to decode property value: {e}");
                Property::Invalid(e.to_string())
            }
        };
        return Ok(Self {
            value_size,
            name,
            value,
        });
    }
}
