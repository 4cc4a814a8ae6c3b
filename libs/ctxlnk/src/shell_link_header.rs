use bitflags::bitflags;
use byteorder::{LE, ReadBytesExt};
use ctxutils::error::invalid;
use ctxutils::win32::{Filetime, GUID};
use serde::{Serialize, Serializer};
use std::fmt::Display;
use std::io;
use std::io::Cursor;

/// The CLSID of all shell links: 00021401-0000-0000-C000-000000000046
pub const LINK_CLSID: GUID = GUID::from_fields(
    0x00021401,
    0x0000,
    0x0000,
    [0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
);

/// The ShellLinkHeader structure contains identification information, timestamps, and flags that specify the presence of optional structures
#[derive(Serialize)]
pub struct ShellLinkHeader {
    /// The size, in bytes, of this structure. This value MUST be 0x0000004C
    pub header_size: u32,
    /// A class identifier (CLSID). This value MUST be 00021401-0000-0000-C000-000000000046
    pub link_clsid: GUID,
    /// A LinkFlags structure that specifies information about the shell link and the presence of optional portions of the structure
    pub link_flags: LinkFlags,
    /// A FileAttributesFlags structure that specifies information about the link target
    pub file_attributes_flag: FileAttributesFlags,
    /// The creation time of the link target in UTC; zero if unset
    pub creation_time: Filetime,
    /// The access time of the link target in UTC; zero if unset
    pub access_time: Filetime,
    /// The write time of the link target in UTC; zero if unset
    pub write_time: Filetime,
    /// The least significant 32 bits of the link target size
    pub file_size: u32,
    /// The index of an icon within a given icon location
    pub icon_index: i32,
    /// The expected window state of an application launched by the link
    pub show_command: ShowCommand,
    /// The keystrokes used to launch the application referenced by the shortcut key
    pub hot_key: HotKeyFlags,
    /// A value that MUST be zero
    pub reserved1: u16,
    /// A value that MUST be zero
    pub reserved2: u32,
    /// A value that MUST be zero
    pub reserved3: u32,
}

impl ShellLinkHeader {
    pub const HEADER_SIZE: usize = 0x4c;

    pub fn from_slice(slice: &[u8]) -> Result<ShellLinkHeader, io::Error> {
        let mut reader = Cursor::new(slice);

        let header_size = reader.read_u32::<LE>()?;
        if header_size as usize != Self::HEADER_SIZE {
            return Err(invalid(format!("Invalid HeaderSize 0x{header_size:x}")));
        }
        let link_clsid = GUID::from_le_stream(&mut reader)?;
        if link_clsid != LINK_CLSID {
            return Err(invalid(format!("Invalid LinkCLSID {link_clsid}")));
        }

        return Ok(ShellLinkHeader {
            header_size,
            link_clsid,
            link_flags: LinkFlags::from_bits_retain(reader.read_u32::<LE>()?),
            file_attributes_flag: FileAttributesFlags::from_bits_retain(reader.read_u32::<LE>()?),
            creation_time: Filetime::from_le_stream(&mut reader)?,
            access_time: Filetime::from_le_stream(&mut reader)?,
            write_time: Filetime::from_le_stream(&mut reader)?,
            file_size: reader.read_u32::<LE>()?,
            icon_index: reader.read_i32::<LE>()?,
            show_command: ShowCommand::new(reader.read_u32::<LE>()?),
            hot_key: HotKeyFlags::new(reader.read_u16::<LE>()?),
            reserved1: reader.read_u16::<LE>()?,
            reserved2: reader.read_u32::<LE>()?,
            reserved3: reader.read_u32::<LE>()?,
        });
    }

    /// Records the header fields which hold values the format forbids
    pub(crate) fn check(&self, anomalies: &mut Vec<String>) {
        if self.reserved1 != 0 || self.reserved2 != 0 || self.reserved3 != 0 {
            anomalies.push("Non zero reserved fields in ShellLinkHeader".to_string());
        }
        if !self.show_command.is_valid() {
            anomalies.push(format!("Invalid ShowCommand 0x{:x}", self.show_command.value));
        }
        if !self.hot_key.is_valid() {
            anomalies.push(format!("Invalid HotKey {}", self.hot_key));
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LinkFlags : u32 {
        const HasLinkTargetIDList = 1;
        const HasLinkInfo = 1 << 1;
        const HasName = 1 << 2;
        const HasRelativePath = 1 << 3;
        const HasWorkingDir = 1 << 4;
        const HasArguments = 1 << 5;
        const HasIconLocation = 1 << 6;
        const IsUnicode = 1 << 7;
        const ForceNoLinkInfo = 1 << 8;
        const HasExpString = 1 << 9;
        const RunInSeparateProcess = 1 << 10;
        const HasDarwinID = 1 << 12;
        const RunAsUser = 1 << 13;
        const HasExpIcon = 1 << 14;
        const NoPidlAlias = 1 << 15;
        const RunWithShimLayer = 1 << 17;
        const ForceNoLinkTrack = 1 << 18;
        const EnableTargetMetadata = 1 << 19;
        const DisableLinkPathTracking = 1 << 20;
        const DisableKnownFolderTracking = 1 << 21;
        const DisableKnownFolderAlias = 1 << 22;
        const AllowLinkToLink = 1 << 23;
        const UnaliasOnSave = 1 << 24;
        const PreferEnvironmentPath = 1 << 25;
        const KeepLocalIDListForUNCTarget = 1 << 26;
    }
}

impl Serialize for LinkFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let v: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        return v.serialize(serializer);
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributesFlags : u32 {
        const FILE_ATTRIBUTE_READONLY = 1;
        const FILE_ATTRIBUTE_HIDDEN = 1 << 1;
        const FILE_ATTRIBUTE_SYSTEM = 1 << 2;
        const Reserved1 = 1 << 3;
        const FILE_ATTRIBUTE_DIRECTORY = 1 << 4;
        const FILE_ATTRIBUTE_ARCHIVE = 1 << 5;
        const Reserved2 = 1 << 6;
        const FILE_ATTRIBUTE_NORMAL = 1 << 7;
        const FILE_ATTRIBUTE_TEMPORARY = 1 << 8;
        const FILE_ATTRIBUTE_SPARSE_FILE = 1 << 9;
        const FILE_ATTRIBUTE_REPARSE_POINT = 1 << 10;
        const FILE_ATTRIBUTE_COMPRESSED = 1 << 11;
        const FILE_ATTRIBUTE_OFFLINE = 1 << 12;
        const FILE_ATTRIBUTE_NOT_CONTENT_INDEXED = 1 << 13;
        const FILE_ATTRIBUTE_ENCRYPTED = 1 << 14;
    }
}

impl Serialize for FileAttributesFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let v: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        return v.serialize(serializer);
    }
}

/// The window state of the launched application
pub struct ShowCommand {
    value: u32,
}

impl ShowCommand {
    pub const SW_SHOWNORMAL: u32 = 0x01;
    pub const SW_SHOWMAXIMIZED: u32 = 0x03;
    pub const SW_SHOWMINNOACTIVE: u32 = 0x07;

    pub fn new(value: u32) -> Self {
        Self { value }
    }

    /// The raw value
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Values other than the three documented ones are treated as SW_SHOWNORMAL
    pub fn is_valid(&self) -> bool {
        matches!(
            self.value,
            Self::SW_SHOWNORMAL | Self::SW_SHOWMAXIMIZED | Self::SW_SHOWMINNOACTIVE
        )
    }
}

impl Display for ShowCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self.value {
            Self::SW_SHOWNORMAL => "SW_SHOWNORMAL",
            Self::SW_SHOWMAXIMIZED => "SW_SHOWMAXIMIZED",
            Self::SW_SHOWMINNOACTIVE => "SW_SHOWMINNOACTIVE",
            _ => "SW_SHOWNORMAL (Invalid)",
        };
        return write!(f, "{result}");
    }
}

impl Serialize for ShowCommand {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        return self.to_string().serialize(serializer);
    }
}

/// A hot key: virtual key code in the low byte, modifiers in the high byte
pub struct HotKeyFlags {
    low_byte: u8,
    high_byte: u8,
}

impl HotKeyFlags {
    const HOTKEYF_SHIFT: u8 = 0x01;
    const HOTKEYF_CONTROL: u8 = 0x02;
    const HOTKEYF_ALT: u8 = 0x04;

    pub fn new(data: u16) -> Self {
        let [low_byte, high_byte] = data.to_le_bytes();
        return Self {
            low_byte,
            high_byte,
        };
    }

    fn key(&self) -> Option<String> {
        return match self.low_byte {
            0 => Some("None".to_string()),
            0x30..=0x39 | 0x41..=0x5A => Some(char::from(self.low_byte).to_string()),
            0x70..=0x87 => Some(format!("F{}", self.low_byte - 0x6F)),
            0x90 => Some("NUM LOCK".to_string()),
            0x91 => Some("SCROLL LOCK".to_string()),
            _ => None,
        };
    }

    /// Checks the key code and the modifier bits
    pub fn is_valid(&self) -> bool {
        let modifiers = Self::HOTKEYF_SHIFT | Self::HOTKEYF_CONTROL | Self::HOTKEYF_ALT;
        self.key().is_some() && self.high_byte & !modifiers == 0
    }
}

impl Display for HotKeyFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (bit, name) in [
            (Self::HOTKEYF_SHIFT, "Shift"),
            (Self::HOTKEYF_CONTROL, "Ctrl"),
            (Self::HOTKEYF_ALT, "Alt"),
        ] {
            if self.high_byte & bit != 0 {
                write!(f, "{name} + ")?;
            }
        }
        return match self.key() {
            Some(key) => write!(f, "{key}"),
            None => write!(f, "Invalid (0x{:02X})", self.low_byte),
        };
    }
}

impl Serialize for HotKeyFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        return self.to_string().serialize(serializer);
    }
}
