//! # Windows Shell Link parser
//!
//! [`LnkFile`] decodes *.lnk* files as described in
//! [\[MS-SHLLINK\]](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-shllink/16cb4ca1-9339-4d0c-a68d-bf1d6cc0f943)
//!
//! A link is made of a fixed [`ShellLinkHeader`](shell_link_header::ShellLinkHeader)
//! followed by optional sections, each announced by a
//! [`LinkFlags`](shell_link_header::LinkFlags) bit:
//! * the target [ITEMIDLIST](idlist::ItemIdList)
//! * the [`LinkInfo`](link_info::LinkInfo)
//! * up to five [`StringData`] entries
//! * a chain of [ExtraData blocks](extra_data::ExtraData)
//!
//! # Examples
//! ```no_run
//! use ctxlnk::LnkFile;
//!
//! fn print_target(path: &str) -> Result<(), std::io::Error> {
//!     let lnk = LnkFile::load(path)?;
//!     if let Some(path) = lnk.link_info.as_ref().and_then(|li| li.local_base_path.as_ref()) {
//!         println!("Target: {path}");
//!     }
//!     if let Some(args) = &lnk.string_data.command_line_arguments {
//!         println!("Arguments: {args}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error handling
//!
//! The header, the ITEMIDLIST, the LinkInfo and the StringData are required to decode
//! correctly. The ExtraData chain is decoded block by block instead: when a block fails,
//! or the block limit is hit, the blocks decoded so far are kept and the failure is
//! reported in [`extra_data_error`](LnkFile::extra_data_error). A chain cut short by the
//! end of the file is only an anomaly
#![allow(clippy::needless_return)]

pub mod config;
pub mod extra_data;
pub mod idlist;
pub mod link_info;
pub mod property_store;
pub mod shell_link_header;

use byteorder::{LE, ReadBytesExt};
use config::Config;
use ctxole::oleps::{CodePage, CodepageString, UnicodeString};
use ctxutils::error::{out_of_range, truncated};
use extra_data::{ChainEnd, ExtraData, ExtraDataBlockIter};
use idlist::ItemIdList;
use link_info::LinkInfo;
use serde::{Serialize, Serializer};
use shell_link_header::{LinkFlags, ShellLinkHeader};
use std::fmt::{self, Display};
use std::fs::File;
use std::io::{self, Cursor, Read, Seek};
use std::path::Path;
use tracing::*;

/// A decoded Shell Link
#[derive(Serialize)]
pub struct LnkFile {
    pub shell_link_header: ShellLinkHeader,
    pub link_target_id_list: Option<LinkTargetIdList>,
    pub link_info: Option<LinkInfo>,
    pub string_data: StringData,
    pub extra_data: Vec<ExtraData>,
    /// The reason the ExtraData chain was not decoded to its end
    pub extra_data_error: Option<String>,
    /// Non fatal divergences from the format
    pub anomalies: Vec<String>,
}

/// Helpers to read the raw strings found in links
pub trait ReadVec {
    /// Reads exactly `size` bytes
    fn read_bytes(&mut self, size: usize) -> Result<Vec<u8>, io::Error>;
    /// Reads a NUL terminated ANSI string
    ///
    /// The end of the input terminates the string as well
    fn read_windows_string(&mut self, codepage: CodePage) -> Result<CodepageString, io::Error>;
    /// Reads a fixed size ANSI field holding a NUL terminated string
    fn read_windows_string_with_size(
        &mut self,
        codepage: CodePage,
        size: usize,
    ) -> Result<CodepageString, io::Error>;
    /// Reads a NUL terminated UTF-16 string
    ///
    /// The end of the input terminates the string as well
    fn read_windows_unicode_string(&mut self) -> Result<UnicodeString, io::Error>;
    /// Reads a fixed size UTF-16 field holding a NUL terminated string
    fn read_windows_unicode_string_with_size(
        &mut self,
        size: usize,
    ) -> Result<UnicodeString, io::Error>;
    /// Reads a counted StringData entry
    fn read_lnk_string_data_entry(
        &mut self,
        codepage: CodePage,
        unicode: bool,
    ) -> Result<StringDataEntry, io::Error>;
    /// Reads the StringData entries announced by `flags`
    fn read_lnk_string_data(
        &mut self,
        codepage: CodePage,
        flags: &LinkFlags,
    ) -> Result<StringData, io::Error>;
}

pub(crate) fn serialize_hex<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
    return hex.serialize(serializer);
}

fn until_nul(data: &[u8]) -> &[u8] {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    &data[0..end]
}

fn until_wide_nul(data: &[u8]) -> &[u8] {
    let end = data
        .chunks_exact(2)
        .position(|c| c == [0, 0])
        .map(|i| i * 2)
        .unwrap_or(data.len() & !1);
    &data[0..end]
}

impl<Reader: Read> ReadVec for Reader {
    fn read_bytes(&mut self, size: usize) -> Result<Vec<u8>, io::Error> {
        // Sizes come from the file: only grow the buffer as data arrives
        let mut result = Vec::<u8>::new();
        self.by_ref().take(size as u64).read_to_end(&mut result)?;
        if result.len() != size {
            return Err(truncated(format!(
                "Expected {size} bytes, only {} available",
                result.len()
            )));
        }
        return Ok(result);
    }

    fn read_windows_string(&mut self, codepage: CodePage) -> Result<CodepageString, io::Error> {
        let mut data = Vec::<u8>::new();
        let mut c = [0u8; 1];
        while self.read(&mut c)? == 1 && c[0] != 0 {
            data.push(c[0]);
        }
        return Ok(CodepageString::new(data, codepage, true));
    }

    fn read_windows_string_with_size(
        &mut self,
        codepage: CodePage,
        size: usize,
    ) -> Result<CodepageString, io::Error> {
        let data = self.read_bytes(size)?;
        return Ok(CodepageString::new(
            until_nul(&data).to_vec(),
            codepage,
            true,
        ));
    }

    fn read_windows_unicode_string(&mut self) -> Result<UnicodeString, io::Error> {
        let mut data = Vec::<u8>::new();
        let mut c = [0u8; 2];
        loop {
            match self.read_exact(&mut c) {
                Ok(()) if c == [0, 0] => break,
                Ok(()) => data.extend_from_slice(&c),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }
        return Ok(UnicodeString { data });
    }

    fn read_windows_unicode_string_with_size(
        &mut self,
        size: usize,
    ) -> Result<UnicodeString, io::Error> {
        let data = self.read_bytes(size)?;
        return Ok(UnicodeString {
            data: until_wide_nul(&data).to_vec(),
        });
    }

    fn read_lnk_string_data_entry(
        &mut self,
        codepage: CodePage,
        unicode: bool,
    ) -> Result<StringDataEntry, io::Error> {
        let count_characters = usize::from(self.read_u16::<LE>()?);
        let entry = match unicode {
            true => StringDataEntry::Unicode(UnicodeString {
                data: self.read_bytes(2 * count_characters)?,
            }),
            false => StringDataEntry::Ansi(CodepageString::new(
                self.read_bytes(count_characters)?,
                codepage,
                false,
            )),
        };
        return Ok(entry);
    }

    fn read_lnk_string_data(
        &mut self,
        codepage: CodePage,
        flags: &LinkFlags,
    ) -> Result<StringData, io::Error> {
        let unicode = flags.contains(LinkFlags::IsUnicode);
        let mut read_if = |flag: LinkFlags| -> Result<Option<StringDataEntry>, io::Error> {
            match flags.contains(flag) {
                true => Ok(Some(self.read_lnk_string_data_entry(codepage, unicode)?)),
                false => Ok(None),
            }
        };
        return Ok(StringData {
            name_string: read_if(LinkFlags::HasName)?,
            relative_path: read_if(LinkFlags::HasRelativePath)?,
            working_dir: read_if(LinkFlags::HasWorkingDir)?,
            command_line_arguments: read_if(LinkFlags::HasArguments)?,
            icon_location: read_if(LinkFlags::HasIconLocation)?,
        });
    }
}

/// The LinkTargetIDList section
#[derive(Serialize)]
pub struct LinkTargetIdList {
    /// The size in bytes of the ITEMIDLIST
    pub id_list_size: u16,
    pub id_list: ItemIdList,
}

/// The optional strings of a link, in file order
#[derive(Serialize)]
pub struct StringData {
    pub name_string: Option<StringDataEntry>,
    pub relative_path: Option<StringDataEntry>,
    pub working_dir: Option<StringDataEntry>,
    pub command_line_arguments: Option<StringDataEntry>,
    pub icon_location: Option<StringDataEntry>,
}

/// A StringData entry, in the encoding selected by [`LinkFlags::IsUnicode`]
pub enum StringDataEntry {
    Unicode(UnicodeString),
    Ansi(CodepageString),
}

impl Display for StringDataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            StringDataEntry::Unicode(s) => write!(f, "{s}"),
            StringDataEntry::Ansi(s) => write!(f, "{s}"),
        };
    }
}

impl Serialize for StringDataEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        return self.to_string().serialize(serializer);
    }
}

impl LnkFile {
    /// Parses the link file at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<LnkFile, io::Error> {
        return Self::load_with_config(path, &Config::default());
    }

    /// Parses the link file at `path` with the given limits
    pub fn load_with_config<P: AsRef<Path>>(
        path: P,
        config: &Config,
    ) -> Result<LnkFile, io::Error> {
        let input_file = File::open(path)?;
        return Self::from_reader_with_config(io::BufReader::new(input_file), config);
    }

    /// Parses a link held in memory
    pub fn from_slice(data: &[u8]) -> Result<LnkFile, io::Error> {
        return Self::from_slice_with_config(data, &Config::default());
    }

    /// Parses a link held in memory with the given limits
    pub fn from_slice_with_config(data: &[u8], config: &Config) -> Result<LnkFile, io::Error> {
        return Self::from_reader_with_config(Cursor::new(data), config);
    }

    /// Parses a link from a reader positioned at its start
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<LnkFile, io::Error> {
        return Self::from_reader_with_config(reader, &Config::default());
    }

    /// Parses a link from a reader positioned at its start with the given limits
    pub fn from_reader_with_config<R: Read + Seek>(
        mut reader: R,
        config: &Config,
    ) -> Result<LnkFile, io::Error> {
        let codepage = config.codepage;
        let start = reader.stream_position()?;
        let mut anomalies = Vec::<String>::new();

        let header_data = reader.read_bytes(ShellLinkHeader::HEADER_SIZE)?;
        let shell_link_header = ShellLinkHeader::from_slice(&header_data)?;
        shell_link_header.check(&mut anomalies);
        let flags = &shell_link_header.link_flags;

        let link_target_id_list = match flags.contains(LinkFlags::HasLinkTargetIDList) {
            true => {
                let id_list_size = reader.read_u16::<LE>()?;
                let data = reader.read_bytes(usize::from(id_list_size))?;
                let id_list = ItemIdList::from_slice(&data, config)?;
                if !id_list.terminated {
                    anomalies.push("LinkTargetIDList without TerminalID".to_string());
                }
                Some(LinkTargetIdList {
                    id_list_size,
                    id_list,
                })
            }
            false => None,
        };

        let link_info = match flags.contains(LinkFlags::HasLinkInfo) {
            true => {
                let link_info_size = reader.read_u32::<LE>()?;
                if link_info_size < LinkInfo::MIN_SIZE {
                    return Err(out_of_range(format!(
                        "LinkInfoSize too small ({link_info_size})"
                    )));
                }
                let mut data = link_info_size.to_le_bytes().to_vec();
                data.extend(reader.read_bytes(link_info_size as usize - 4)?);
                Some(LinkInfo::from_slice(codepage, &data)?)
            }
            false => None,
        };
        if link_info.is_some() && flags.contains(LinkFlags::ForceNoLinkInfo) {
            anomalies.push("LinkInfo present despite ForceNoLinkInfo".to_string());
        }

        let string_data = reader.read_lnk_string_data(codepage, flags)?;

        let extra_data_offset = reader.stream_position()? - start;
        let mut remainder = Vec::<u8>::new();
        reader.read_to_end(&mut remainder)?;
        debug!(
            "ExtraData: {} bytes at offset 0x{:x}",
            remainder.len(),
            extra_data_offset
        );

        let mut extra_data = Vec::<ExtraData>::new();
        let mut extra_data_error: Option<String> = None;
        let mut blocks = ExtraDataBlockIter::new(&remainder, codepage, config);
        for block in blocks.by_ref() {
            match block {
                Ok(block) => extra_data.push(block),
                Err(e) => {
                    warn!("Failed to decode ExtraData block: {e}");
                    extra_data_error = Some(e.to_string());
                    break;
                }
            }
        }
        if extra_data_error.is_none() {
            match blocks.end() {
                Some(ChainEnd::Terminal) => {
                    if blocks.position() < remainder.len() {
                        anomalies.push(format!(
                            "{} bytes of data after the TerminalBlock",
                            remainder.len() - blocks.position()
                        ));
                    }
                }
                Some(ChainEnd::Eof) | None => {
                    anomalies.push("Missing TerminalBlock".to_string());
                }
                Some(ChainEnd::ShortRead) => {
                    anomalies.push(format!(
                        "ExtraData block at offset 0x{:x} exceeds the end of file",
                        extra_data_offset + blocks.position() as u64
                    ));
                }
                Some(ChainEnd::Limit) => {
                    extra_data_error = Some(format!(
                        "ExtraData block limit reached ({})",
                        config.max_extra_blocks
                    ));
                }
            }
        }
        if let Some(e) = &extra_data_error {
            anomalies.push(format!("ExtraData decoding stopped: {e}"));
        }

        return Ok(Self {
            shell_link_header,
            link_target_id_list,
            link_info,
            string_data,
            extra_data,
            extra_data_error,
            anomalies,
        });
    }

    /// Indicates whether some ExtraData blocks could not be decoded
    pub fn is_partial(&self) -> bool {
        self.extra_data_error.is_some()
    }

    /// Lists the divergences from the format found while parsing
    pub fn anomalies(&self) -> &[String] {
        self.anomalies.as_slice()
    }
}
