//! The ITEMIDLIST structure and the shell items it holds
//!
//! An ITEMIDLIST is a sequence of `ItemID`s, each prefixed by its 16 bit size,
//! followed by a zero size `TerminalID`. The content of each item is opaque
//! to the link format; the layouts decoded here are those used by the Windows
//! shell namespace for the most common item classes
use super::{ReadVec, config::Config};
use byteorder::{LE, ReadBytesExt};
use ctxole::oleps::{CodePage, CodepageString, UnicodeString};
use ctxutils::error::{invalid, out_of_range};
use ctxutils::win32::GUID;
use serde::{Serialize, Serializer};
use std::fmt::{self, Display};
use std::io::{self, Cursor, Read};
use time::{Date, Month, PrimitiveDateTime, Time};
use tracing::*;

/// A decoded ITEMIDLIST
#[derive(Serialize)]
pub struct ItemIdList {
    pub items: Vec<ShellItemId>,
    /// Whether the list ended with a TerminalID rather than with the input
    pub terminated: bool,
}

impl ItemIdList {
    /// Decodes the items in `slice`, stopping at the TerminalID
    ///
    /// Bytes after the TerminalID are ignored. An input that ends cleanly on
    /// an item boundary yields an unterminated list
    pub fn from_slice(slice: &[u8], config: &Config) -> Result<ItemIdList, io::Error> {
        let mut items = Vec::<ShellItemId>::new();
        let mut position = 0usize;
        let mut terminated = false;
        while position < slice.len() {
            if slice.len() - position < 2 {
                return Err(out_of_range(format!(
                    "Truncated ItemID size at offset 0x{position:x}"
                )));
            }
            let size = usize::from(u16::from_le_bytes([slice[position], slice[position + 1]]));
            if size == 0 {
                terminated = true;
                break;
            }
            if size < 2 {
                return Err(invalid(format!(
                    "Invalid ItemID size {size} at offset 0x{position:x}"
                )));
            }
            if size > slice.len() - position {
                return Err(out_of_range(format!(
                    "ItemID at offset 0x{position:x} exceeds the ITEMIDLIST ({size} bytes)"
                )));
            }
            if items.len() >= config.max_idlist_items {
                return Err(out_of_range(format!(
                    "Too many items in ITEMIDLIST (limit {})",
                    config.max_idlist_items
                )));
            }
            items.push(ShellItemId::from_slice(
                config.codepage,
                &slice[position..position + size],
            ));
            position += size;
        }
        debug!("ITEMIDLIST: {} items, terminated: {terminated}", items.len());
        return Ok(ItemIdList { items, terminated });
    }
}

/// A single ItemID
#[derive(Serialize)]
pub struct ShellItemId {
    /// The ItemIDSize, which includes the size field itself
    pub size: u16,
    /// The raw item data, without the size field
    #[serde(serialize_with = "crate::serialize_hex")]
    pub data: Vec<u8>,
    pub item: ShellItem,
}

impl ShellItemId {
    /// Splits a complete item, size field included; `slice` must be at least 2 bytes long
    fn from_slice(codepage: CodePage, slice: &[u8]) -> ShellItemId {
        let size = u16::from_le_bytes([slice[0], slice[1]]);
        let data = &slice[2..];
        let item = match ShellItem::from_slice(codepage, data) {
            Ok(item) => item,
            Err(e) => {
                debug!("Failed to decode shell item: {e}");
                ShellItem::Unknown
            }
        };
        return ShellItemId {
            size,
            data: data.to_vec(),
            item,
        };
    }
}

/// The decoded content of a shell item, by class
#[derive(Serialize)]
pub enum ShellItem {
    RootFolder(RootFolderItem),
    Volume(VolumeItem),
    FileEntry(FileEntryItem),
    Uri(UriItem),
    /// An item whose class is not decoded, or which failed to decode
    Unknown,
}

impl ShellItem {
    /// Decodes the item data which follows the size field
    pub fn from_slice(codepage: CodePage, data: &[u8]) -> Result<ShellItem, io::Error> {
        let Some(class_type) = data.first() else {
            return Ok(ShellItem::Unknown);
        };
        let item = match class_type {
            0x1e..=0x1f => ShellItem::RootFolder(RootFolderItem::from_slice(data)?),
            0x20..=0x2f => ShellItem::Volume(VolumeItem::from_slice(codepage, data)?),
            0x30..=0x3f => ShellItem::FileEntry(FileEntryItem::from_slice(codepage, data)?),
            0x61 => ShellItem::Uri(UriItem::from_slice(codepage, data)?),
            _ => ShellItem::Unknown,
        };
        return Ok(item);
    }
}

/// A name stored either in the ANSI code page or in UTF-16
pub enum ItemName {
    Ansi(CodepageString),
    Unicode(UnicodeString),
}

impl ItemName {
    fn read(
        reader: &mut Cursor<&[u8]>,
        codepage: CodePage,
        unicode: bool,
    ) -> Result<ItemName, io::Error> {
        return match unicode {
            true => Ok(ItemName::Unicode(reader.read_windows_unicode_string()?)),
            false => Ok(ItemName::Ansi(reader.read_windows_string(codepage)?)),
        };
    }
}

impl Display for ItemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            ItemName::Ansi(s) => write!(f, "{s}"),
            ItemName::Unicode(s) => write!(f, "{s}"),
        };
    }
}

impl Serialize for ItemName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        return self.to_string().serialize(serializer);
    }
}

/// A shell folder such as "My Computer", identified by its CLSID
#[derive(Serialize)]
pub struct RootFolderItem {
    pub class_type: u8,
    pub sort_index: u8,
    pub shell_folder_id: GUID,
    #[serde(serialize_with = "crate::serialize_hex")]
    pub extension: Vec<u8>,
}

impl RootFolderItem {
    pub fn from_slice(data: &[u8]) -> Result<Self, io::Error> {
        let mut reader = Cursor::new(data);
        let class_type = reader.read_u8()?;
        let sort_index = reader.read_u8()?;
        let shell_folder_id = GUID::from_le_stream(&mut reader)?;
        return Ok(Self {
            class_type,
            sort_index,
            shell_folder_id,
            extension: data[reader.position() as usize..].to_vec(),
        });
    }
}

/// A drive, optionally carrying its name
#[derive(Serialize)]
pub struct VolumeItem {
    pub class_type: u8,
    pub name: Option<CodepageString>,
}

impl VolumeItem {
    pub fn from_slice(codepage: CodePage, data: &[u8]) -> Result<Self, io::Error> {
        let mut reader = Cursor::new(data);
        let class_type = reader.read_u8()?;
        let name = match class_type & 0x01 {
            0 => None,
            _ => Some(reader.read_windows_string(codepage)?),
        };
        return Ok(Self { class_type, name });
    }
}

/// A file or directory
#[derive(Serialize)]
pub struct FileEntryItem {
    pub class_type: u8,
    /// The class type flags: 0x01 directory, 0x02 file, 0x04 unicode names
    pub flags: u8,
    pub file_size: u32,
    pub modification_time: FatDateTime,
    pub file_attributes: u16,
    pub primary_name: ItemName,
    pub extensions: Vec<ExtensionBlock>,
}

impl FileEntryItem {
    pub const FLAG_UNICODE: u8 = 0x04;

    pub fn from_slice(codepage: CodePage, data: &[u8]) -> Result<Self, io::Error> {
        let mut reader = Cursor::new(data);
        let class_type = reader.read_u8()?;
        let flags = class_type & 0x8f;
        let _padding = reader.read_u8()?;
        let file_size = reader.read_u32::<LE>()?;
        let modification_time = FatDateTime::read(&mut reader)?;
        let file_attributes = reader.read_u16::<LE>()?;
        let primary_name = ItemName::read(&mut reader, codepage, flags & Self::FLAG_UNICODE != 0)?;
        let extensions = match first_extension_offset(data) {
            Some(offset) => ExtensionBlock::read_all(codepage, &data[offset..])?,
            None => Vec::new(),
        };
        return Ok(Self {
            class_type,
            flags,
            file_size,
            modification_time,
            file_attributes,
            primary_name,
            extensions,
        });
    }
}

/// Locates the first extension block through the offset stored in the last
/// two bytes of the item
///
/// The stored offset counts from the start of the item, size field included
fn first_extension_offset(data: &[u8]) -> Option<usize> {
    let len = data.len();
    if len < 2 {
        return None;
    }
    let offset = usize::from(u16::from_le_bytes([data[len - 2], data[len - 1]])).checked_sub(2)?;
    let signature = data.get(offset + 4..offset + 8)?;
    match signature[2..4] == [0xef, 0xbe] {
        true => Some(offset),
        false => None,
    }
}

/// An extension block appended to a file entry item
#[derive(Serialize)]
pub enum ExtensionBlock {
    Beef0004(Beef0004),
    Unsupported(UnsupportedExtension),
}

impl ExtensionBlock {
    /// Reads consecutive extension blocks until the data runs out
    fn read_all(codepage: CodePage, data: &[u8]) -> Result<Vec<ExtensionBlock>, io::Error> {
        let mut blocks = Vec::<ExtensionBlock>::new();
        let mut position = 0usize;
        while data.len() - position >= 8 {
            let size = usize::from(u16::from_le_bytes([data[position], data[position + 1]]));
            if size < 8 || size > data.len() - position {
                break;
            }
            blocks.push(ExtensionBlock::from_slice(
                codepage,
                &data[position..position + size],
            )?);
            position += size;
        }
        return Ok(blocks);
    }

    fn from_slice(codepage: CodePage, block: &[u8]) -> Result<ExtensionBlock, io::Error> {
        let mut reader = Cursor::new(block);
        let size = reader.read_u16::<LE>()?;
        let version = reader.read_u16::<LE>()?;
        let signature = reader.read_u32::<LE>()?;
        return match signature {
            Beef0004::SIGNATURE => Ok(ExtensionBlock::Beef0004(Beef0004::from_slice(
                codepage, size, version, block,
            )?)),
            _ => Ok(ExtensionBlock::Unsupported(UnsupportedExtension {
                size,
                version,
                signature,
                data: block[8..].to_vec(),
            })),
        };
    }
}

/// The file entry extension holding the long file name and the NTFS file reference
#[derive(Serialize)]
pub struct Beef0004 {
    pub size: u16,
    pub version: u16,
    pub creation_time: FatDateTime,
    pub access_time: FatDateTime,
    pub windows_version: u16,
    /// The NTFS MFT entry and sequence number
    pub file_reference: Option<u64>,
    pub localized_name_size: Option<u16>,
    pub long_name: Option<UnicodeString>,
    pub localized_name: Option<ItemName>,
    pub first_extension_version_offset: u16,
}

impl Beef0004 {
    pub const SIGNATURE: u32 = 0xbeef0004;

    fn from_slice(
        codepage: CodePage,
        size: u16,
        version: u16,
        block: &[u8],
    ) -> Result<Self, io::Error> {
        if block.len() < 10 {
            return Err(invalid(format!("BEEF0004 extension too small ({size})")));
        }
        let trailer = &block[block.len() - 2..];
        let first_extension_version_offset = u16::from_le_bytes([trailer[0], trailer[1]]);
        let mut reader = Cursor::new(&block[8..block.len() - 2]);
        let creation_time = FatDateTime::read(&mut reader)?;
        let access_time = FatDateTime::read(&mut reader)?;
        let windows_version = reader.read_u16::<LE>()?;

        let file_reference = match version >= 7 {
            true => {
                reader.read_bytes(2)?;
                let file_reference = reader.read_u64::<LE>()?;
                reader.read_bytes(8)?;
                Some(file_reference)
            }
            false => None,
        };
        let localized_name_size = match version >= 3 {
            true => Some(reader.read_u16::<LE>()?),
            false => None,
        };
        if version >= 9 {
            reader.read_bytes(4)?;
        }
        if version >= 8 {
            reader.read_bytes(4)?;
        }
        let long_name = match version >= 3 {
            true => Some(reader.read_windows_unicode_string()?),
            false => None,
        };
        let localized_name = match localized_name_size {
            Some(size) if size > 0 => Some(ItemName::read(&mut reader, codepage, version >= 7)?),
            _ => None,
        };
        return Ok(Self {
            size,
            version,
            creation_time,
            access_time,
            windows_version,
            file_reference,
            localized_name_size,
            long_name,
            localized_name,
            first_extension_version_offset,
        });
    }
}

#[derive(Serialize)]
pub struct UnsupportedExtension {
    pub size: u16,
    pub version: u16,
    pub signature: u32,
    #[serde(serialize_with = "crate::serialize_hex")]
    pub data: Vec<u8>,
}

/// A URI, as found in links to web resources
#[derive(Serialize)]
pub struct UriItem {
    pub class_type: u8,
    pub flags: u8,
    pub uri: ItemName,
}

impl UriItem {
    pub fn from_slice(codepage: CodePage, data: &[u8]) -> Result<Self, io::Error> {
        let mut reader = Cursor::new(data);
        let class_type = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let data_size = reader.read_u32::<LE>()?;
        if data_size != 0 {
            return Err(invalid(format!(
                "Unsupported URI shell item with data size {data_size}"
            )));
        }
        let uri = ItemName::read(&mut reader, codepage, flags & 0x80 != 0)?;
        return Ok(Self {
            class_type,
            flags,
            uri,
        });
    }
}

/// A date and time in MS-DOS format, as stored in shell items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatDateTime {
    pub date: u16,
    pub time: u16,
}

impl FatDateTime {
    fn read<R: Read>(reader: &mut R) -> Result<Self, io::Error> {
        return Ok(Self {
            date: reader.read_u16::<LE>()?,
            time: reader.read_u16::<LE>()?,
        });
    }

    /// Converts to a date time; `None` for unset or invalid values
    pub fn to_datetime(&self) -> Option<PrimitiveDateTime> {
        let year = i32::from(self.date >> 9) + 1980;
        let month = Month::try_from(((self.date >> 5) & 0x0f) as u8).ok()?;
        let day = (self.date & 0x1f) as u8;
        let hour = (self.time >> 11) as u8;
        let minute = ((self.time >> 5) & 0x3f) as u8;
        let second = 2 * (self.time & 0x1f) as u8;
        let date = Date::from_calendar_date(year, month, day).ok()?;
        let time = Time::from_hms(hour, minute, second).ok()?;
        return Some(PrimitiveDateTime::new(date, time));
    }
}

impl Serialize for FatDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        return match self.to_datetime() {
            Some(datetime) => datetime.to_string().serialize(serializer),
            None => (self.date, self.time).serialize(serializer),
        };
    }
}
