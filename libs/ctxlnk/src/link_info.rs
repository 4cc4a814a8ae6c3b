//! The LinkInfo structure: where to find the link target when the ITEMIDLIST can't be resolved
//!
//! All the offsets are relative to the start of their own structure and must
//! point inside it. Strings are NUL terminated, or end with their structure
use super::ReadVec;
use bitflags::bitflags;
use byteorder::{LE, ReadBytesExt};
use ctxole::oleps::{CodePage, CodepageString, UnicodeString};
use ctxutils::error::out_of_range;
use serde::{Serialize, Serializer};
use std::{
    fmt::Display,
    io::{self, Cursor},
};

/// Reads a NUL terminated ANSI string at `offset`
fn string_at(slice: &[u8], offset: u32, codepage: CodePage) -> Result<CodepageString, io::Error> {
    return Cursor::new(tail(slice, offset)?).read_windows_string(codepage);
}

/// Reads a NUL terminated UTF-16 string at `offset`
fn unicode_string_at(slice: &[u8], offset: u32) -> Result<UnicodeString, io::Error> {
    return Cursor::new(tail(slice, offset)?).read_windows_unicode_string();
}

fn tail(slice: &[u8], offset: u32) -> Result<&[u8], io::Error> {
    let offset = offset as usize;
    if offset >= slice.len() {
        return Err(out_of_range(format!(
            "Offset 0x{offset:x} exceeds structure size 0x{:x}",
            slice.len()
        )));
    }
    return Ok(&slice[offset..]);
}

/// Returns the structure at `offset`, bounded by the size it declares
fn sized_at<'a>(slice: &'a [u8], offset: u32, min_size: u32, what: &str) -> Result<&'a [u8], io::Error> {
    let data = tail(slice, offset)?;
    let size = Cursor::new(data).read_u32::<LE>()?;
    if size < min_size {
        return Err(out_of_range(format!("{what} size too small ({size})")));
    }
    return data
        .get(0..size as usize)
        .ok_or_else(|| out_of_range(format!("{what} size exceeds LinkInfo ({size})")));
}

#[derive(Serialize)]
pub struct LinkInfo {
    pub link_info_size: u32,
    pub link_info_header_size: u32,
    pub link_info_flags: LinkInfoFlags,
    pub volume_id_offset: u32,
    pub local_base_path_offset: u32,
    pub common_network_relative_link_offset: u32,
    pub common_path_suffix_offset: u32,
    pub local_base_path_offset_unicode: Option<u32>,
    pub common_path_suffix_offset_unicode: Option<u32>,
    pub volume_id: Option<VolumeID>,
    pub local_base_path: Option<CodepageString>,
    pub local_base_path_unicode: Option<UnicodeString>,
    pub common_network_relative_link: Option<CommonNetworkRelativeLink>,
    pub common_path_suffix: Option<CodepageString>,
    pub common_path_suffix_unicode: Option<UnicodeString>,
}

impl LinkInfo {
    /// The size of a LinkInfo without the optional Unicode offsets
    pub const MIN_SIZE: u32 = 0x1c;

    /// Parses a LinkInfo; `slice` must hold exactly `LinkInfoSize` bytes
    pub fn from_slice(codepage: CodePage, slice: &[u8]) -> Result<LinkInfo, io::Error> {
        let mut reader = Cursor::new(slice);
        let link_info_size = reader.read_u32::<LE>()?;
        let link_info_header_size = reader.read_u32::<LE>()?;
        let link_info_flags = LinkInfoFlags::from_bits_retain(reader.read_u32::<LE>()?);
        let volume_id_offset = reader.read_u32::<LE>()?;
        let local_base_path_offset = reader.read_u32::<LE>()?;
        let common_network_relative_link_offset = reader.read_u32::<LE>()?;
        let common_path_suffix_offset = reader.read_u32::<LE>()?;
        let (local_base_path_offset_unicode, common_path_suffix_offset_unicode) =
            match link_info_header_size >= 0x24 {
                true => (
                    Some(reader.read_u32::<LE>()?),
                    Some(reader.read_u32::<LE>()?),
                ),
                false => (None, None),
            };

        let has_volume_id = link_info_flags.contains(LinkInfoFlags::VolumeIDAndLocalBasePath);
        let volume_id = match has_volume_id {
            true => Some(VolumeID::from_slice(
                codepage,
                sized_at(slice, volume_id_offset, VolumeID::MIN_SIZE, "VolumeID")?,
            )?),
            false => None,
        };
        let local_base_path = match has_volume_id {
            true => Some(string_at(slice, local_base_path_offset, codepage)?),
            false => None,
        };
        let local_base_path_unicode = match (has_volume_id, local_base_path_offset_unicode) {
            (true, Some(offset)) if offset != 0 => Some(unicode_string_at(slice, offset)?),
            _ => None,
        };

        let common_network_relative_link = match link_info_flags
            .contains(LinkInfoFlags::CommonNetworkRelativeLinkAndPathSuffix)
        {
            true => Some(CommonNetworkRelativeLink::from_slice(
                codepage,
                sized_at(
                    slice,
                    common_network_relative_link_offset,
                    CommonNetworkRelativeLink::MIN_SIZE,
                    "CommonNetworkRelativeLink",
                )?,
            )?),
            false => None,
        };

        let common_path_suffix = match common_path_suffix_offset {
            0 => None,
            offset => Some(string_at(slice, offset, codepage)?),
        };
        let common_path_suffix_unicode = match common_path_suffix_offset_unicode {
            Some(offset) if offset != 0 => Some(unicode_string_at(slice, offset)?),
            _ => None,
        };

        return Ok(LinkInfo {
            link_info_size,
            link_info_header_size,
            link_info_flags,
            volume_id_offset,
            local_base_path_offset,
            common_network_relative_link_offset,
            common_path_suffix_offset,
            local_base_path_offset_unicode,
            common_path_suffix_offset_unicode,
            volume_id,
            local_base_path,
            local_base_path_unicode,
            common_network_relative_link,
            common_path_suffix,
            common_path_suffix_unicode,
        });
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LinkInfoFlags : u32 {
        const VolumeIDAndLocalBasePath = 1;
        const CommonNetworkRelativeLinkAndPathSuffix = 1 << 1;
    }
}

impl Serialize for LinkInfoFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let v: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        return v.serialize(serializer);
    }
}

/// The volume holding the link target
#[derive(Serialize)]
pub struct VolumeID {
    pub volume_id_size: u32,
    pub drive_type: DriveType,
    pub drive_serial_number: u32,
    pub volume_label_offset: u32,
    pub volume_label_offset_unicode: Option<u32>,
    pub volume_label: Option<CodepageString>,
    pub volume_label_unicode: Option<UnicodeString>,
}

impl VolumeID {
    pub const MIN_SIZE: u32 = 0x10;

    /// Parses a VolumeID; `slice` must hold exactly `VolumeIDSize` bytes
    pub fn from_slice(codepage: CodePage, slice: &[u8]) -> Result<VolumeID, io::Error> {
        let mut reader = Cursor::new(slice);
        let volume_id_size = reader.read_u32::<LE>()?;
        let drive_type: DriveType = reader.read_u32::<LE>()?.into();
        let drive_serial_number = reader.read_u32::<LE>()?;
        let volume_label_offset = reader.read_u32::<LE>()?;
        // An offset of 0x14 means the label is only stored as UTF-16
        let (volume_label_offset_unicode, volume_label, volume_label_unicode) =
            match volume_label_offset {
                0x14 => {
                    let offset = reader.read_u32::<LE>()?;
                    (Some(offset), None, Some(unicode_string_at(slice, offset)?))
                }
                offset => (None, Some(string_at(slice, offset, codepage)?), None),
            };

        return Ok(VolumeID {
            volume_id_size,
            drive_type,
            drive_serial_number,
            volume_label_offset,
            volume_label_offset_unicode,
            volume_label,
            volume_label_unicode,
        });
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriveType {
    DriveUnknown,
    DriveNoRootDir,
    DriveRemovable,
    DriveFixed,
    DriveRemote,
    DriveCdrom,
    DriveRamdisk,
    #[serde(serialize_with = "serialize_drive_type_invalid")]
    Invalid(u32),
}

fn serialize_drive_type_invalid<S>(value: &u32, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    return format!("0x{:08X}", value).serialize(s);
}

impl From<u32> for DriveType {
    fn from(value: u32) -> Self {
        match value {
            0 => DriveType::DriveUnknown,
            1 => DriveType::DriveNoRootDir,
            2 => DriveType::DriveRemovable,
            3 => DriveType::DriveFixed,
            4 => DriveType::DriveRemote,
            5 => DriveType::DriveCdrom,
            6 => DriveType::DriveRamdisk,
            other => DriveType::Invalid(other),
        }
    }
}

/// The network location of the link target
#[derive(Serialize)]
pub struct CommonNetworkRelativeLink {
    pub common_network_relative_link_size: u32,
    pub common_network_relative_link_flags: CommonNetworkRelativeLinkFlags,
    pub net_name_offset: u32,
    pub device_name_offset: u32,
    /// Only meaningful when `ValidNetType` is set
    pub network_provider_type: Option<NetworkProviderType>,
    pub net_name_offset_unicode: Option<u32>,
    pub device_name_offset_unicode: Option<u32>,
    pub net_name: CodepageString,
    pub device_name: Option<CodepageString>,
    pub net_name_unicode: Option<UnicodeString>,
    pub device_name_unicode: Option<UnicodeString>,
}

impl CommonNetworkRelativeLink {
    pub const MIN_SIZE: u32 = 0x14;

    /// Parses a CommonNetworkRelativeLink; `slice` must hold exactly its declared size
    pub fn from_slice(
        codepage: CodePage,
        slice: &[u8],
    ) -> Result<CommonNetworkRelativeLink, io::Error> {
        let mut reader = Cursor::new(slice);
        let common_network_relative_link_size = reader.read_u32::<LE>()?;
        let common_network_relative_link_flags =
            CommonNetworkRelativeLinkFlags::from_bits_retain(reader.read_u32::<LE>()?);
        let net_name_offset = reader.read_u32::<LE>()?;
        let device_name_offset = reader.read_u32::<LE>()?;
        let network_provider_type = reader.read_u32::<LE>()?;
        let has_unicode = net_name_offset > 0x14;
        let (net_name_offset_unicode, device_name_offset_unicode) = match has_unicode {
            true => (
                Some(reader.read_u32::<LE>()?),
                Some(reader.read_u32::<LE>()?),
            ),
            false => (None, None),
        };
        let valid_device = common_network_relative_link_flags
            .contains(CommonNetworkRelativeLinkFlags::ValidDevice);

        let net_name = string_at(slice, net_name_offset, codepage)?;
        let device_name = match valid_device {
            true => Some(string_at(slice, device_name_offset, codepage)?),
            false => None,
        };
        let net_name_unicode = match net_name_offset_unicode {
            Some(offset) => Some(unicode_string_at(slice, offset)?),
            None => None,
        };
        let device_name_unicode = match (valid_device, device_name_offset_unicode) {
            (true, Some(offset)) => Some(unicode_string_at(slice, offset)?),
            _ => None,
        };

        return Ok(CommonNetworkRelativeLink {
            common_network_relative_link_size,
            common_network_relative_link_flags,
            net_name_offset,
            device_name_offset,
            network_provider_type: common_network_relative_link_flags
                .contains(CommonNetworkRelativeLinkFlags::ValidNetType)
                .then(|| NetworkProviderType::new(network_provider_type)),
            net_name_offset_unicode,
            device_name_offset_unicode,
            net_name,
            device_name,
            net_name_unicode,
            device_name_unicode,
        });
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommonNetworkRelativeLinkFlags : u32 {
        const ValidDevice = 1;
        const ValidNetType = 1 << 1;
    }
}

impl Serialize for CommonNetworkRelativeLinkFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let v: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        return v.serialize(serializer);
    }
}

const NETWORK_PROVIDERS: &[(u32, &str)] = &[
    (0x001A0000, "WNNC_NET_AVID"),
    (0x001B0000, "WNNC_NET_DOCUSPACE"),
    (0x001C0000, "WNNC_NET_MANGOSOFT"),
    (0x001D0000, "WNNC_NET_SERNET"),
    (0x001E0000, "WNNC_NET_RIVERFRONT1"),
    (0x001F0000, "WNNC_NET_RIVERFRONT2"),
    (0x00200000, "WNNC_NET_DECORB"),
    (0x00210000, "WNNC_NET_PROTSTOR"),
    (0x00220000, "WNNC_NET_FJ_REDIR"),
    (0x00230000, "WNNC_NET_DISTINCT"),
    (0x00240000, "WNNC_NET_TWINS"),
    (0x00250000, "WNNC_NET_RDR2SAMPLE"),
    (0x00260000, "WNNC_NET_CSC"),
    (0x00270000, "WNNC_NET_3IN1"),
    (0x00290000, "WNNC_NET_EXTENDNET"),
    (0x002A0000, "WNNC_NET_STAC"),
    (0x002B0000, "WNNC_NET_FOXBAT"),
    (0x002C0000, "WNNC_NET_YAHOO"),
    (0x002D0000, "WNNC_NET_EXIFS"),
    (0x002E0000, "WNNC_NET_DAV"),
    (0x002F0000, "WNNC_NET_KNOWARE"),
    (0x00300000, "WNNC_NET_OBJECT_DIRE"),
    (0x00310000, "WNNC_NET_MASFAX"),
    (0x00320000, "WNNC_NET_HOB_NFS"),
    (0x00330000, "WNNC_NET_SHIVA"),
    (0x00340000, "WNNC_NET_IBMAL"),
    (0x00350000, "WNNC_NET_LOCK"),
    (0x00360000, "WNNC_NET_TERMSRV"),
    (0x00370000, "WNNC_NET_SRT"),
    (0x00380000, "WNNC_NET_QUINCY"),
    (0x00390000, "WNNC_NET_OPENAFS"),
    (0x003A0000, "WNNC_NET_AVID1"),
    (0x003B0000, "WNNC_NET_DFS"),
    (0x003C0000, "WNNC_NET_KWNP"),
    (0x003D0000, "WNNC_NET_ZENWORKS"),
    (0x003E0000, "WNNC_NET_DRIVEONWEB"),
    (0x003F0000, "WNNC_NET_VMWARE"),
    (0x00400000, "WNNC_NET_RSFX"),
    (0x00410000, "WNNC_NET_MFILES"),
    (0x00420000, "WNNC_NET_MS_NFS"),
    (0x00430000, "WNNC_NET_GOOGLE"),
];

/// The type of network provider
pub struct NetworkProviderType {
    value: u32,
}

impl NetworkProviderType {
    pub fn new(value: u32) -> Self {
        Self { value }
    }

    /// The WNNC_NET_* name of the provider, if known
    pub fn name(&self) -> Option<&'static str> {
        NETWORK_PROVIDERS
            .iter()
            .find(|(v, _)| *v == self.value)
            .map(|(_, name)| *name)
    }
}

impl Display for NetworkProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "Invalid 0x{:0X}", self.value),
        };
    }
}

impl Serialize for NetworkProviderType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        return self.to_string().serialize(serializer);
    }
}
