//! The ExtraData blocks appended to a link
//!
//! [`ExtraDataBlockIter`] walks the chain of blocks and decodes each of them
//! according to its signature
use super::{ReadVec, config::Config, idlist::ItemIdList, property_store::SerializedPropertyStore};
use bitflags::bitflags;
use byteorder::{LE, ReadBytesExt};
use ctxole::oleps::{CodePage, CodepageString, UnicodeString};
use ctxutils::error::invalid;
use ctxutils::win32::GUID;
use serde::{Serialize, Serializer, ser::SerializeStruct};
use std::io::{self, Cursor};
use tracing::*;

pub const ENVIRONMENT_PROPS: u32 = 0xA0000001;
pub const CONSOLE_PROPS: u32 = 0xA0000002;
pub const TRACKER_PROPS: u32 = 0xA0000003;
pub const CONSOLE_FE_PROPS: u32 = 0xA0000004;
pub const SPECIAL_FOLDER_PROPS: u32 = 0xA0000005;
pub const DARWIN_PROPS: u32 = 0xA0000006;
pub const ICON_ENVIRONMENT_PROPS: u32 = 0xA0000007;
pub const SHIM_PROPS: u32 = 0xA0000008;
pub const PROPERTY_STORE_PROPS: u32 = 0xA0000009;
pub const KNOWN_FOLDER_PROPS: u32 = 0xA000000B;
pub const VISTA_AND_ABOVE_IDLIST_PROPS: u32 = 0xA000000C;

const BLOCK_HEADER_SIZE: usize = 8;

/// How the ExtraData chain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEnd {
    /// A TerminalBlock (size below 4 or null signature)
    Terminal,
    /// The input ended on a block boundary
    Eof,
    /// A block extends past the end of the input
    ShortRead,
    /// Too many blocks
    Limit,
}

/// Iterator over the ExtraData blocks in `data`
///
/// Iteration ends at the TerminalBlock, at the end of the input, on a block
/// that doesn't fit the input or after [`Config::max_extra_blocks`] blocks.
/// None of these conditions is an error; see [`end`](Self::end).
///
/// A block which fails to decode is returned as an `Err`. The iterator
/// always moves forward by at least the size of a block header.
pub struct ExtraDataBlockIter<'a> {
    data: &'a [u8],
    position: usize,
    count: usize,
    codepage: CodePage,
    config: &'a Config,
    end: Option<ChainEnd>,
}

impl<'a> ExtraDataBlockIter<'a> {
    pub fn new(data: &'a [u8], codepage: CodePage, config: &'a Config) -> Self {
        Self {
            data,
            position: 0,
            count: 0,
            codepage,
            config,
            end: None,
        }
    }

    /// The offset of the next unread byte
    pub fn position(&self) -> usize {
        self.position
    }

    /// The reason iteration stopped, once it has
    pub fn end(&self) -> Option<ChainEnd> {
        self.end
    }

    fn stop(&mut self, end: ChainEnd) -> Option<Result<ExtraData, io::Error>> {
        debug!("ExtraData chain ended at 0x{:x}: {:?}", self.position, end);
        self.end = Some(end);
        return None;
    }
}

impl Iterator for ExtraDataBlockIter<'_> {
    type Item = Result<ExtraData, io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end.is_some() {
            return None;
        }
        let remaining = &self.data[self.position..];
        if remaining.is_empty() {
            return self.stop(ChainEnd::Eof);
        }
        let mut reader = Cursor::new(remaining);
        let Ok(block_size) = reader.read_u32::<LE>() else {
            return self.stop(ChainEnd::ShortRead);
        };
        if block_size < 4 {
            self.position += 4;
            return self.stop(ChainEnd::Terminal);
        }
        let Ok(block_signature) = reader.read_u32::<LE>() else {
            return self.stop(ChainEnd::ShortRead);
        };
        if block_signature == 0 {
            self.position += 4;
            return self.stop(ChainEnd::Terminal);
        }
        let block_size = block_size as usize;
        if block_size > remaining.len() {
            return self.stop(ChainEnd::ShortRead);
        }
        if self.count >= self.config.max_extra_blocks {
            return self.stop(ChainEnd::Limit);
        }
        self.count += 1;
        self.position += block_size.max(BLOCK_HEADER_SIZE);
        debug!("ExtraData block 0x{block_signature:08X} ({block_size} bytes)");
        if block_size < BLOCK_HEADER_SIZE {
            return Some(Err(invalid(format!(
                "ExtraData block 0x{block_signature:08X} smaller than its header ({block_size})"
            ))));
        }
        let block = &remaining[0..block_size];
        return Some(ExtraData::from_slice(
            self.codepage,
            block_signature,
            block,
            self.config,
        ));
    }
}

#[derive(Serialize)]
pub enum ExtraData {
    ConsoleDataBlock(ConsoleDataBlock),
    ConsoleFEDataBlock(ConsoleFEDataBlock),
    DarwinDataBlock(DarwinDataBlock),
    EnvironmentVariableDataBlock(EnvironmentVariableDataBlock),
    IconEnvironmentDataBlock(IconEnvironmentDataBlock),
    KnownFolderDataBlock(KnownFolderDataBlock),
    PropertyStoreDataBlock(PropertyStoreDataBlock),
    ShimDataBlock(ShimDataBlock),
    SpecialFolderDataBlock(SpecialFolderDataBlock),
    TrackerDataBlock(TrackerDataBlock),
    VistaAndAboveIDListDataBlock(VistaAndAboveIDListDataBlock),
    Unsupported(UnsupportedBlock),
}

impl ExtraData {
    /// Decodes a whole block, header included
    pub fn from_slice(
        codepage: CodePage,
        block_signature: u32,
        slice: &[u8],
        config: &Config,
    ) -> Result<ExtraData, io::Error> {
        let block: ExtraData = match block_signature {
            CONSOLE_PROPS => ExtraData::ConsoleDataBlock(ConsoleDataBlock::from_slice(slice)?),
            CONSOLE_FE_PROPS => {
                ExtraData::ConsoleFEDataBlock(ConsoleFEDataBlock::from_slice(slice)?)
            }
            DARWIN_PROPS => {
                ExtraData::DarwinDataBlock(StringsDataBlock::from_slice(codepage, slice)?)
            }
            ENVIRONMENT_PROPS => ExtraData::EnvironmentVariableDataBlock(
                StringsDataBlock::from_slice(codepage, slice)?,
            ),
            ICON_ENVIRONMENT_PROPS => {
                ExtraData::IconEnvironmentDataBlock(StringsDataBlock::from_slice(codepage, slice)?)
            }
            KNOWN_FOLDER_PROPS => {
                ExtraData::KnownFolderDataBlock(KnownFolderDataBlock::from_slice(slice)?)
            }
            PROPERTY_STORE_PROPS => ExtraData::PropertyStoreDataBlock(
                PropertyStoreDataBlock::from_slice(slice, config)?,
            ),
            SHIM_PROPS => ExtraData::ShimDataBlock(ShimDataBlock::from_slice(slice)?),
            SPECIAL_FOLDER_PROPS => {
                ExtraData::SpecialFolderDataBlock(SpecialFolderDataBlock::from_slice(slice)?)
            }
            TRACKER_PROPS => {
                ExtraData::TrackerDataBlock(TrackerDataBlock::from_slice(codepage, slice)?)
            }
            VISTA_AND_ABOVE_IDLIST_PROPS => ExtraData::VistaAndAboveIDListDataBlock(
                VistaAndAboveIDListDataBlock::from_slice(slice, config)?,
            ),
            _ => ExtraData::Unsupported(UnsupportedBlock::from_slice(slice)?),
        };

        return Ok(block);
    }

    /// The signature of the block
    pub fn signature(&self) -> u32 {
        return match self {
            ExtraData::ConsoleDataBlock(_) => CONSOLE_PROPS,
            ExtraData::ConsoleFEDataBlock(_) => CONSOLE_FE_PROPS,
            ExtraData::DarwinDataBlock(_) => DARWIN_PROPS,
            ExtraData::EnvironmentVariableDataBlock(_) => ENVIRONMENT_PROPS,
            ExtraData::IconEnvironmentDataBlock(_) => ICON_ENVIRONMENT_PROPS,
            ExtraData::KnownFolderDataBlock(_) => KNOWN_FOLDER_PROPS,
            ExtraData::PropertyStoreDataBlock(_) => PROPERTY_STORE_PROPS,
            ExtraData::ShimDataBlock(_) => SHIM_PROPS,
            ExtraData::SpecialFolderDataBlock(_) => SPECIAL_FOLDER_PROPS,
            ExtraData::TrackerDataBlock(_) => TRACKER_PROPS,
            ExtraData::VistaAndAboveIDListDataBlock(_) => VISTA_AND_ABOVE_IDLIST_PROPS,
            ExtraData::Unsupported(block) => block.block_signature,
        };
    }
}

/// Reads the block header and checks its size
fn read_block_header(
    reader: &mut Cursor<&[u8]>,
    name: &str,
    size_ok: impl FnOnce(u32) -> bool,
) -> Result<(u32, u32), io::Error> {
    let block_size = reader.read_u32::<LE>()?;
    let block_signature = reader.read_u32::<LE>()?;
    if !size_ok(block_size) {
        return Err(invalid(format!("Invalid {name} BlockSize 0x{block_size:x}")));
    }
    return Ok((block_size, block_signature));
}

/// A console window coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Coord {
    pub x: i16,
    pub y: i16,
}

impl Coord {
    fn read(reader: &mut Cursor<&[u8]>) -> Result<Self, io::Error> {
        return Ok(Self {
            x: reader.read_i16::<LE>()?,
            y: reader.read_i16::<LE>()?,
        });
    }
}

/// Display settings of the console window, if the link target is a console application
#[derive(Serialize)]
pub struct ConsoleDataBlock {
    pub block_size: u32,
    pub block_signature: u32,
    pub fill_attributes: FillAttributes,
    pub popup_fill_attributes: FillAttributes,
    pub screen_buffer_size: Coord,
    pub window_size: Coord,
    pub window_origin: Coord,
    pub unused1: u32,
    pub unused2: u32,
    pub font_size: u32,
    pub font_family: FontFamily,
    pub font_weight: u32,
    pub face_name: UnicodeString,
    pub cursor_size: u32,
    pub full_screen: u32,
    pub quick_edit: u32,
    pub insert_mode: u32,
    pub auto_position: u32,
    pub history_buffer_size: u32,
    pub number_of_history_buffers: u32,
    pub history_no_dup: u32,
    pub color_table: [u32; 16],
}

impl ConsoleDataBlock {
    pub const SIZE: u32 = 0xCC;

    pub fn from_slice(slice: &[u8]) -> Result<ConsoleDataBlock, io::Error> {
        let mut reader = Cursor::new(slice);
        let (block_size, block_signature) =
            read_block_header(&mut reader, "ConsoleDataBlock", |s| s == Self::SIZE)?;
        return Ok(ConsoleDataBlock {
            block_size,
            block_signature,
            fill_attributes: FillAttributes::from_bits_retain(reader.read_u16::<LE>()?),
            popup_fill_attributes: FillAttributes::from_bits_retain(reader.read_u16::<LE>()?),
            screen_buffer_size: Coord::read(&mut reader)?,
            window_size: Coord::read(&mut reader)?,
            window_origin: Coord::read(&mut reader)?,
            unused1: reader.read_u32::<LE>()?,
            unused2: reader.read_u32::<LE>()?,
            font_size: reader.read_u32::<LE>()?,
            font_family: FontFamily::new(reader.read_u32::<LE>()?),
            font_weight: reader.read_u32::<LE>()?,
            face_name: reader.read_windows_unicode_string_with_size(64)?,
            cursor_size: reader.read_u32::<LE>()?,
            full_screen: reader.read_u32::<LE>()?,
            quick_edit: reader.read_u32::<LE>()?,
            insert_mode: reader.read_u32::<LE>()?,
            auto_position: reader.read_u32::<LE>()?,
            history_buffer_size: reader.read_u32::<LE>()?,
            number_of_history_buffers: reader.read_u32::<LE>()?,
            history_no_dup: reader.read_u32::<LE>()?,
            color_table: reader.read_u32_array::<16>()?,
        });
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FillAttributes : u16 {
        const FOREGROUND_BLUE = 0x01;
        const FOREGROUND_GREEN = 0x02;
        const FOREGROUND_RED = 0x04;
        const FOREGROUND_INTENSITY = 0x08;
        const BACKGROUND_BLUE = 0x10;
        const BACKGROUND_GREEN = 0x20;
        const BACKGROUND_RED = 0x40;
        const BACKGROUND_INTENSITY = 0x80;
    }
}

impl Serialize for FillAttributes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let v: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        return v.serialize(serializer);
    }
}

/// Font family and pitch of the console font
pub struct FontFamily {
    value: u32,
}

impl FontFamily {
    pub fn new(value: u32) -> Self {
        Self { value }
    }

    pub fn font_family(&self) -> &'static str {
        return match self.value & 0xFFF0 {
            0x0000 => "FF_DONTCARE",
            0x0010 => "FF_ROMAN",
            0x0020 => "FF_SWISS",
            0x0030 => "FF_MODERN",
            0x0040 => "FF_SCRIPT",
            0x0050 => "FF_DECORATIVE",
            _ => "INVALID",
        };
    }

    pub fn font_pitch(&self) -> Vec<&'static str> {
        let fp = self.value & 0x000F;
        if fp == 0 {
            return vec!["TMPF_NONE"];
        }
        return [
            (0x01, "TMPF_FIXED_PITCH"),
            (0x02, "TMPF_VECTOR"),
            (0x04, "TMPF_TRUETYPE"),
            (0x08, "TMPF_DEVICE"),
        ]
        .into_iter()
        .filter(|(bit, _)| fp & bit != 0)
        .map(|(_, name)| name)
        .collect();
    }
}

impl Serialize for FontFamily {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("FontFamily", 2)?;
        state.serialize_field("name", self.font_family())?;
        state.serialize_field("pitch", &self.font_pitch())?;
        return state.end();
    }
}

/// A Windows locale identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Lcid {
    pub value: u32,
}

impl Lcid {
    /// The primary language identifier
    pub fn language(&self) -> u16 {
        (self.value & 0xFFFF) as u16
    }

    /// The sort order identifier
    pub fn sort_id(&self) -> u8 {
        ((self.value >> 16) & 0x0F) as u8
    }
}

/// The code page used to display text when the link target is a console application
#[derive(Serialize)]
pub struct ConsoleFEDataBlock {
    pub block_size: u32,
    pub block_signature: u32,
    pub code_page: Lcid,
}

impl ConsoleFEDataBlock {
    pub const SIZE: u32 = 0x0C;

    pub fn from_slice(slice: &[u8]) -> Result<ConsoleFEDataBlock, io::Error> {
        let mut reader = Cursor::new(slice);
        let (block_size, block_signature) =
            read_block_header(&mut reader, "ConsoleFEDataBlock", |s| s == Self::SIZE)?;
        return Ok(ConsoleFEDataBlock {
            block_size,
            block_signature,
            code_page: Lcid {
                value: reader.read_u32::<LE>()?,
            },
        });
    }
}

/// A block holding the same string in ANSI and Unicode form
///
/// The layout of DarwinDataBlock, EnvironmentVariableDataBlock and IconEnvironmentDataBlock
#[derive(Serialize)]
pub struct StringsDataBlock {
    pub block_size: u32,
    pub block_signature: u32,
    pub target_ansi: CodepageString,
    pub target_unicode: UnicodeString,
}

/// An application identifier for Windows Installer advertised shortcuts
pub type DarwinDataBlock = StringsDataBlock;
/// The path to an environment variable
pub type EnvironmentVariableDataBlock = StringsDataBlock;
/// The path to an icon, with environment variables
pub type IconEnvironmentDataBlock = StringsDataBlock;

impl StringsDataBlock {
    pub const SIZE: u32 = 0x314;

    pub fn from_slice(codepage: CodePage, slice: &[u8]) -> Result<StringsDataBlock, io::Error> {
        let mut reader = Cursor::new(slice);
        let (block_size, block_signature) =
            read_block_header(&mut reader, "StringsDataBlock", |s| s == Self::SIZE)?;
        return Ok(StringsDataBlock {
            block_size,
            block_signature,
            target_ansi: reader.read_windows_string_with_size(codepage, 260)?,
            target_unicode: reader.read_windows_unicode_string_with_size(520)?,
        });
    }
}

/// The location of a known folder
#[derive(Serialize)]
pub struct KnownFolderDataBlock {
    pub block_size: u32,
    pub block_signature: u32,
    pub known_folder_id: GUID,
    /// Offset of the folder item in the ITEMIDLIST
    pub offset: u32,
}

impl KnownFolderDataBlock {
    pub const SIZE: u32 = 0x1C;

    pub fn from_slice(slice: &[u8]) -> Result<KnownFolderDataBlock, io::Error> {
        let mut reader = Cursor::new(slice);
        let (block_size, block_signature) =
            read_block_header(&mut reader, "KnownFolderDataBlock", |s| s == Self::SIZE)?;
        return Ok(KnownFolderDataBlock {
            block_size,
            block_signature,
            known_folder_id: GUID::from_le_stream(&mut reader)?,
            offset: reader.read_u32::<LE>()?,
        });
    }
}

/// A set of properties that can be used by applications to store extra data
#[derive(Serialize)]
pub struct PropertyStoreDataBlock {
    pub block_size: u32,
    pub block_signature: u32,
    pub property_store: SerializedPropertyStore,
}

impl PropertyStoreDataBlock {
    pub const MIN_SIZE: u32 = 0x0C;

    pub fn from_slice(slice: &[u8], config: &Config) -> Result<PropertyStoreDataBlock, io::Error> {
        let mut reader = Cursor::new(slice);
        let (block_size, block_signature) =
            read_block_header(&mut reader, "PropertyStoreDataBlock", |s| {
                s >= Self::MIN_SIZE
            })?;
        return Ok(PropertyStoreDataBlock {
            block_size,
            block_signature,
            property_store: SerializedPropertyStore::from_slice(
                &slice[BLOCK_HEADER_SIZE..],
                &config.oleps,
            )?,
        });
    }
}

/// The name of a shim layer to apply to the link target
#[derive(Serialize)]
pub struct ShimDataBlock {
    pub block_size: u32,
    pub block_signature: u32,
    pub layer_name: UnicodeString,
}

impl ShimDataBlock {
    pub const MIN_SIZE: u32 = 0x88;

    pub fn from_slice(slice: &[u8]) -> Result<ShimDataBlock, io::Error> {
        let mut reader = Cursor::new(slice);
        let (block_size, block_signature) =
            read_block_header(&mut reader, "ShimDataBlock", |s| s >= Self::MIN_SIZE)?;
        let layer_name =
            reader.read_windows_unicode_string_with_size(slice.len() - BLOCK_HEADER_SIZE)?;
        return Ok(ShimDataBlock {
            block_size,
            block_signature,
            layer_name,
        });
    }
}

/// The location of a special folder
#[derive(Serialize)]
pub struct SpecialFolderDataBlock {
    pub block_size: u32,
    pub block_signature: u32,
    pub special_folder_id: u32,
    /// Offset of the folder item in the ITEMIDLIST
    pub offset: u32,
}

impl SpecialFolderDataBlock {
    pub const SIZE: u32 = 0x10;

    pub fn from_slice(slice: &[u8]) -> Result<SpecialFolderDataBlock, io::Error> {
        let mut reader = Cursor::new(slice);
        let (block_size, block_signature) =
            read_block_header(&mut reader, "SpecialFolderDataBlock", |s| s == Self::SIZE)?;
        return Ok(SpecialFolderDataBlock {
            block_size,
            block_signature,
            special_folder_id: reader.read_u32::<LE>()?,
            offset: reader.read_u32::<LE>()?,
        });
    }
}

/// The identity of a file in the Distributed Link Tracking service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DomainRelativeObjId {
    pub volume: GUID,
    pub object: GUID,
}

impl DomainRelativeObjId {
    fn read(reader: &mut Cursor<&[u8]>) -> Result<Self, io::Error> {
        return Ok(Self {
            volume: GUID::from_le_stream(reader)?,
            object: GUID::from_le_stream(reader)?,
        });
    }
}

/// Data used to resolve a link target that was moved
#[derive(Serialize)]
pub struct TrackerDataBlock {
    pub block_size: u32,
    pub block_signature: u32,
    pub length: u32,
    pub version: u32,
    /// The NetBIOS name of the machine where the link target was last known to reside
    pub machine_id: CodepageString,
    pub droid: DomainRelativeObjId,
    pub droid_birth: DomainRelativeObjId,
}

impl TrackerDataBlock {
    pub const SIZE: u32 = 0x60;

    pub fn from_slice(codepage: CodePage, slice: &[u8]) -> Result<TrackerDataBlock, io::Error> {
        let mut reader = Cursor::new(slice);
        let (block_size, block_signature) =
            read_block_header(&mut reader, "TrackerDataBlock", |s| s == Self::SIZE)?;
        let length = reader.read_u32::<LE>()?;
        if length != 0x58 {
            return Err(invalid(format!("Invalid TrackerDataBlock Length 0x{length:x}")));
        }
        let version = reader.read_u32::<LE>()?;
        if version != 0 {
            return Err(invalid(format!("Invalid TrackerDataBlock Version {version}")));
        }
        return Ok(TrackerDataBlock {
            block_size,
            block_signature,
            length,
            version,
            machine_id: reader.read_windows_string_with_size(codepage, 16)?,
            droid: DomainRelativeObjId::read(&mut reader)?,
            droid_birth: DomainRelativeObjId::read(&mut reader)?,
        });
    }
}

/// An alternate ITEMIDLIST used instead of the LinkTargetIDList on Vista and later
#[derive(Serialize)]
pub struct VistaAndAboveIDListDataBlock {
    pub block_size: u32,
    pub block_signature: u32,
    pub id_list: ItemIdList,
}

impl VistaAndAboveIDListDataBlock {
    pub const MIN_SIZE: u32 = 0x0A;

    pub fn from_slice(
        slice: &[u8],
        config: &Config,
    ) -> Result<VistaAndAboveIDListDataBlock, io::Error> {
        let mut reader = Cursor::new(slice);
        let (block_size, block_signature) =
            read_block_header(&mut reader, "VistaAndAboveIDListDataBlock", |s| {
                s >= Self::MIN_SIZE
            })?;
        return Ok(VistaAndAboveIDListDataBlock {
            block_size,
            block_signature,
            id_list: ItemIdList::from_slice(&slice[BLOCK_HEADER_SIZE..], config)?,
        });
    }
}

/// A block with an unknown signature
#[derive(Serialize)]
pub struct UnsupportedBlock {
    pub block_size: u32,
    pub block_signature: u32,
    #[serde(serialize_with = "crate::serialize_hex")]
    pub data: Vec<u8>,
}

impl UnsupportedBlock {
    pub fn from_slice(slice: &[u8]) -> Result<UnsupportedBlock, io::Error> {
        let mut reader = Cursor::new(slice);
        let (block_size, block_signature) =
            read_block_header(&mut reader, "ExtraData", |s| s as usize == slice.len())?;
        return Ok(UnsupportedBlock {
            block_size,
            block_signature,
            data: slice[BLOCK_HEADER_SIZE..].to_vec(),
        });
    }
}

trait ReadArray {
    fn read_u32_array<const SIZE: usize>(&mut self) -> Result<[u32; SIZE], io::Error>;
}

impl<Reader: std::io::Read> ReadArray for Reader {
    fn read_u32_array<const SIZE: usize>(&mut self) -> Result<[u32; SIZE], io::Error> {
        let mut result: [u32; SIZE] = [0; SIZE];
        for i in result.iter_mut() {
            *i = self.read_u32::<LE>()?;
        }
        return Ok(result);
    }
}
