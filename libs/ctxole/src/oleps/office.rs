//! Office specific property encodings
//!
//! A few properties of the *SummaryInformation* and *DocumentSummaryInformation* sets carry
//! structures that the generic decoder only sees as blobs or loose vectors. They are described in
//! [\[MS-OSHARED\]](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-oshared/d93502fa-cb07-4f2b-a1c1-5d9a4ecfaae1)
//! and decoded here into their meaningful form.
//!
//! Decoding is attempted by [`PropertySet`](super::PropertySet) before the generic decoder; on
//! failure the property is decoded generically.
use super::{
    CP_WINUNICODE, CodePage, CodepageString, Dictionary, FromOlepsReader, TypedPropertyValue,
    UnicodeString, VT_BLOB, VT_CF, VT_I4, VT_LPSTR, VT_LPWSTR, VT_VARIANT, VT_VECTOR, padding,
    read_type_tag, read_vec, serialize_hex,
};
use crate::config::Config;
use ctxutils::error::{invalid, out_of_range, unknown_type};
use ctxutils::io::*;
use ctxutils::win32::GUID;
use serde::Serialize;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use tracing::debug;

/// The SummaryInformation property set
pub const FMTID_SUMMARY_INFORMATION: GUID = GUID::from_fields(
    0xF29F85E0,
    0x4FF9,
    0x1068,
    [0xAB, 0x91, 0x08, 0x00, 0x2B, 0x27, 0xB3, 0xD9],
);
/// The DocumentSummaryInformation property set
pub const FMTID_DOC_SUMMARY_INFORMATION: GUID = GUID::from_fields(
    0xD5CDD502,
    0x2E9C,
    0x101B,
    [0x93, 0x97, 0x08, 0x00, 0x2B, 0x2C, 0xF9, 0xAE],
);
/// The User Defined property set (second set of the DocumentSummaryInformation stream)
pub const FMTID_USER_DEFINED_PROPERTIES: GUID = GUID::from_fields(
    0xD5CDD505,
    0x2E9C,
    0x101B,
    [0x93, 0x97, 0x08, 0x00, 0x2B, 0x2C, 0xF9, 0xAE],
);

/// Thumbnail of the document
pub const PIDSI_THUMBNAIL: u32 = 0x0000_0011;
/// Headings of the document parts
pub const PIDDSI_HEADINGPAIR: u32 = 0x0000_000C;
/// Names of the document parts
pub const PIDDSI_DOCPARTS: u32 = 0x0000_000D;
/// Hyperlinks in the document
pub const PIDDSI_HLINKS: u32 = 0x0000_0015;
/// VBA project signature
pub const PIDDSI_DIGSIG: u32 = 0x0000_0018;
/// Dictionary name of the user defined hyperlinks property
pub const PID_HLINKS_NAME: &str = "_PID_HLINKS";

/// The Office decoders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlay {
    /// [`VtThumbnail`]
    Thumbnail,
    /// [`VtHeadingPairs`]
    HeadingPairs,
    /// [`VtDocParts`]
    DocParts,
    /// [`VtHyperlinks`]
    Hyperlinks,
    /// [`DigSigBlob`]
    DigSig,
}

/// Selects the Office decoder for a property, if any
pub fn overlay_for(
    fmtid: &GUID,
    property_identifier: u32,
    value_type: u16,
    dictionary: Option<&Dictionary>,
) -> Option<Overlay> {
    let summary = *fmtid == FMTID_SUMMARY_INFORMATION;
    let doc_summary = *fmtid == FMTID_DOC_SUMMARY_INFORMATION;
    match (property_identifier, value_type) {
        (PIDSI_THUMBNAIL, VT_CF) if summary => Some(Overlay::Thumbnail),
        (PIDDSI_HEADINGPAIR, t) if doc_summary && t == VT_VECTOR | VT_VARIANT => {
            Some(Overlay::HeadingPairs)
        }
        (PIDDSI_DOCPARTS, t)
            if doc_summary && (t == VT_VECTOR | VT_LPSTR || t == VT_VECTOR | VT_LPWSTR) =>
        {
            Some(Overlay::DocParts)
        }
        (PIDDSI_HLINKS, VT_BLOB) if doc_summary => Some(Overlay::Hyperlinks),
        (PIDDSI_DIGSIG, VT_BLOB) if doc_summary => Some(Overlay::DigSig),
        (pid, VT_BLOB)
            if dictionary
                .and_then(|d| d.name_of(pid))
                .is_some_and(|name| name == PID_HLINKS_NAME) =>
        {
            Some(Overlay::Hyperlinks)
        }
        _ => None,
    }
}

impl Overlay {
    /// Decodes a property value, the type tag having been consumed already
    pub fn decode<R: Read + Seek>(
        &self,
        reader: &mut R,
        value_type: u16,
        codepage: CodePage,
        config: &Config,
    ) -> Result<OfficeProperty, io::Error> {
        let property = match self {
            Self::Thumbnail => OfficeProperty::VtThumbnail(VtThumbnail::new(reader)?),
            Self::HeadingPairs => {
                OfficeProperty::VtHeadingPairs(VtHeadingPairs::new(reader, codepage, config)?)
            }
            Self::DocParts => OfficeProperty::VtDocParts(VtDocParts::new(
                reader, value_type, codepage, config,
            )?),
            Self::Hyperlinks => {
                let blob = read_blob(reader)?;
                OfficeProperty::VtHyperlinks(VtHyperlinks::from_slice(&blob, codepage, config)?)
            }
            Self::DigSig => {
                let blob = read_blob(reader)?;
                OfficeProperty::VtDigSig(DigSigBlob::from_slice(&blob)?)
            }
        };
        Ok(property)
    }
}

/// A property in its Office specific form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OfficeProperty {
    /// PIDSI_THUMBNAIL
    VtThumbnail(VtThumbnail),
    /// PIDDSI_HEADINGPAIR
    VtHeadingPairs(VtHeadingPairs),
    /// PIDDSI_DOCPARTS
    VtDocParts(VtDocParts),
    /// PIDDSI_HLINKS or _PID_HLINKS
    VtHyperlinks(VtHyperlinks),
    /// PIDDSI_DIGSIG
    VtDigSig(DigSigBlob),
}

fn read_blob<R: Read + Seek>(reader: &mut R) -> Result<Vec<u8>, io::Error> {
    let size = rdu32le(reader)?;
    let data = read_vec(reader, size, "Blob")?;
    reader.seek(SeekFrom::Current(padding(size.into()) as i64))?;
    Ok(data)
}

/// The thumbnail image of the document (a VT_CF)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VtThumbnail {
    /// Size of the format tag and data
    pub size: u32,
    /// Clipboard format tag: -1 (Windows), -2 (Macintosh), -3 (FMTID) or 0 (none)
    pub format: u32,
    /// The actual format (e.g. CF_METAFILEPICT) when a format tag is present
    pub secondary_format: Option<u32>,
    /// Image data
    #[serde(serialize_with = "serialize_hex")]
    pub data: Vec<u8>,
}

impl VtThumbnail {
    fn new<R: Read + Seek>(reader: &mut R) -> Result<Self, io::Error> {
        let size = rdu32le(reader)?;
        if size < 4 {
            return Err(invalid(format!("Invalid thumbnail size {size}")));
        }
        let format = rdu32le(reader)?;
        let mut data = read_vec(reader, size - 4, "Thumbnail")?;
        reader.seek(SeekFrom::Current(padding(size.into()) as i64))?;
        let secondary_format = if format != 0 && data.len() >= 4 {
            let tail = data.split_off(4);
            let secondary = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            data = tail;
            Some(secondary)
        } else {
            None
        };
        Ok(Self {
            size,
            format,
            secondary_format,
            data,
        })
    }
}

/// Reads a VtUnalignedString: a type tag followed by an unpadded LPSTR or a padded LPWSTR
fn read_unaligned_string<R: Read + Seek>(
    reader: &mut R,
    codepage: CodePage,
) -> Result<String, io::Error> {
    match read_type_tag(reader)? {
        VT_LPSTR => read_unaligned_lpstr(reader, codepage),
        VT_LPWSTR => Ok(UnicodeString::from_oleps_reader(reader, codepage, true)?.to_string()),
        vt => Err(unknown_type(format!(
            "Unexpected string type 0x{vt:04X} in VtUnalignedString"
        ))),
    }
}

/// Reads an UnalignedLpstr: a byte count and the text, no padding
fn read_unaligned_lpstr<R: Read + Seek>(
    reader: &mut R,
    codepage: CodePage,
) -> Result<String, io::Error> {
    let size = rdu32le(reader)?;
    let s = CodepageString::new_noalign(reader, codepage, size, true)?;
    if codepage == CP_WINUNICODE {
        reader.seek(SeekFrom::Current(padding(size.into()) as i64))?;
    }
    Ok(s.to_string())
}

fn check_count(count: u32, config: &Config) -> Result<(), io::Error> {
    if count > config.max_sequence_items {
        return Err(out_of_range(format!("Too many elements ({count})")));
    }
    Ok(())
}

/// The headings of the document parts, each with the number of parts it groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VtHeadingPairs {
    /// Heading names and part counts
    pub pairs: Vec<(String, i32)>,
}

impl VtHeadingPairs {
    fn new<R: Read + Seek>(
        reader: &mut R,
        codepage: CodePage,
        config: &Config,
    ) -> Result<Self, io::Error> {
        let start = reader.stream_position()?;
        // Counts the elements, i.e. twice the pairs
        let count = rdu32le(reader)?;
        check_count(count, config)?;
        if count % 2 != 0 {
            return Err(invalid(format!("Odd number of heading pair elements ({count})")));
        }
        let mut pairs = Vec::with_capacity((count as usize / 2).min(1024));
        for _ in 0..count / 2 {
            let heading = read_unaligned_string(reader, codepage)?;
            let vt = read_type_tag(reader)?;
            if vt != VT_I4 {
                return Err(invalid(format!(
                    "Unexpected heading part count type 0x{vt:04X}"
                )));
            }
            pairs.push((heading, rdi32le(reader)?));
        }
        let len = reader.stream_position()? - start;
        reader.seek(SeekFrom::Current(padding(len) as i64))?;
        Ok(Self { pairs })
    }

    /// The total number of parts
    pub fn parts_count(&self) -> i64 {
        self.pairs.iter().map(|(_, n)| i64::from(*n)).sum()
    }
}

/// The names of the document parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VtDocParts {
    /// Part names
    pub parts: Vec<String>,
}

impl VtDocParts {
    fn new<R: Read + Seek>(
        reader: &mut R,
        value_type: u16,
        codepage: CodePage,
        config: &Config,
    ) -> Result<Self, io::Error> {
        let start = reader.stream_position()?;
        let count = rdu32le(reader)?;
        check_count(count, config)?;
        let mut parts = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            let part = if value_type == VT_VECTOR | VT_LPWSTR {
                UnicodeString::from_oleps_reader(reader, codepage, true)?.to_string()
            } else {
                read_unaligned_lpstr(reader, codepage)?
            };
            parts.push(part);
        }
        let len = reader.stream_position()? - start;
        reader.seek(SeekFrom::Current(padding(len) as i64))?;
        Ok(Self { parts })
    }
}

/// A hyperlink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VtHyperlink {
    /// Hash of hlink1 and hlink2
    pub hash: i32,
    /// Application specific value
    pub app: i32,
    /// Shape identifier, for links attached to shapes
    pub office_art: i32,
    /// Link type flags
    pub info: i32,
    /// The target
    pub hlink1: String,
    /// The location within the target
    pub hlink2: String,
}

/// The hyperlinks in the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VtHyperlinks {
    /// The hyperlinks
    pub hyperlinks: Vec<VtHyperlink>,
}

impl VtHyperlinks {
    /// Decodes the content of a hyperlinks blob
    pub fn from_slice(data: &[u8], codepage: CodePage, config: &Config) -> Result<Self, io::Error> {
        let mut reader = Cursor::new(data);
        // Counts the elements: six for each link
        let count = rdu32le(&mut reader)?;
        check_count(count, config)?;
        if count % 6 != 0 {
            return Err(invalid(format!(
                "Invalid number of hyperlink elements ({count})"
            )));
        }
        let mut hyperlinks = Vec::with_capacity((count as usize / 6).min(1024));
        for _ in 0..count / 6 {
            let hash = read_hlink_int(&mut reader, codepage, config)?;
            let app = read_hlink_int(&mut reader, codepage, config)?;
            let office_art = read_hlink_int(&mut reader, codepage, config)?;
            let info = read_hlink_int(&mut reader, codepage, config)?;
            let hlink1 = read_hlink_string(&mut reader, codepage, config)?;
            let hlink2 = read_hlink_string(&mut reader, codepage, config)?;
            hyperlinks.push(VtHyperlink {
                hash,
                app,
                office_art,
                info,
                hlink1,
                hlink2,
            });
        }
        debug!("Found {} hyperlinks", hyperlinks.len());
        Ok(Self { hyperlinks })
    }
}

fn read_hlink_int<R: Read + Seek>(
    reader: &mut R,
    codepage: CodePage,
    config: &Config,
) -> Result<i32, io::Error> {
    match TypedPropertyValue::new(reader, codepage, config)? {
        TypedPropertyValue::I4(v) => Ok(v),
        other => Err(invalid(format!(
            "Unexpected hyperlink field type 0x{:04X}",
            other.value_type()
        ))),
    }
}

fn read_hlink_string<R: Read + Seek>(
    reader: &mut R,
    codepage: CodePage,
    config: &Config,
) -> Result<String, io::Error> {
    let value = TypedPropertyValue::new(reader, codepage, config)?;
    value.as_string().ok_or_else(|| {
        invalid(format!(
            "Unexpected hyperlink string type 0x{:04X}",
            value.value_type()
        ))
    })
}

/// The digital signature of the VBA project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigSigBlob {
    /// Size of the signature info (cbSigInfo)
    pub data_size: u32,
    /// Offset of the signature info, should be 8 (serializedPointer)
    pub sig_info_offset: u32,
    /// The signature info
    pub sig_info: DigSigInfoSerialized,
}

impl DigSigBlob {
    /// Decodes a DigSigBlob
    ///
    /// The field offsets of the signature info are relative to the start of `data`
    pub fn from_slice(data: &[u8]) -> Result<Self, io::Error> {
        let mut reader = Cursor::new(data);
        let data_size = rdu32le(&mut reader)?;
        let sig_info_offset = rdu32le(&mut reader)?;
        let sig_info = DigSigInfoSerialized::from_slice(data, sig_info_offset, 0)?;
        Ok(Self {
            data_size,
            sig_info_offset,
            sig_info,
        })
    }
}

/// The serialized signature info
///
/// Fields which point outside of the available data are `None`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigSigInfoSerialized {
    /// The PKCS#7 signature
    #[serde(serialize_with = "serialize_opt_hex")]
    pub signature: Option<Vec<u8>>,
    /// The signing certificate store
    #[serde(serialize_with = "serialize_opt_hex")]
    pub cert_store: Option<Vec<u8>>,
    /// The name of the signed VBA project
    pub project_name: Option<String>,
    /// The timestamp flag, reserved
    pub timestamp: u32,
    /// The URL of the timestamp server
    pub timestamp_url: Option<String>,
}

fn serialize_opt_hex<S>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match data {
        Some(data) => serialize_hex(data, serializer),
        None => serializer.serialize_none(),
    }
}

fn sig_info_field(data: &[u8], base: u32, offset: u32, len: u64) -> Option<&[u8]> {
    let start = u64::from(base).checked_add(u64::from(offset))?;
    let end = start.checked_add(len)?;
    data.get(usize::try_from(start).ok()?..usize::try_from(end).ok()?)
}

impl DigSigInfoSerialized {
    /// Decodes the signature info at `sig_info_offset`
    ///
    /// Field offsets are relative to `field_base`: the start of the DigSigBlob for property
    /// sets, the start of the signature info itself when embedded in Word documents
    pub fn from_slice(data: &[u8], sig_info_offset: u32, field_base: u32) -> Result<Self, io::Error> {
        let header = usize::try_from(sig_info_offset)
            .ok()
            .and_then(|start| data.get(start..))
            .ok_or_else(|| out_of_range(format!("Invalid signature info offset {sig_info_offset}")))?;
        let mut reader = Cursor::new(header);
        let cb_signature = rdu32le(&mut reader)?;
        let signature_offset = rdu32le(&mut reader)?;
        let cb_cert_store = rdu32le(&mut reader)?;
        let cert_store_offset = rdu32le(&mut reader)?;
        let cch_project_name = rdu32le(&mut reader)?;
        let project_name_offset = rdu32le(&mut reader)?;
        let timestamp = rdu32le(&mut reader)?;
        let cch_timestamp_url = rdu32le(&mut reader)?;
        let timestamp_url_offset = rdu32le(&mut reader)?;

        let field = |offset: u32, len: u64| sig_info_field(data, field_base, offset, len);
        let utf16 = |bytes: &[u8]| {
            let (text, _) = encoding_rs::UTF_16LE.decode_without_bom_handling(bytes);
            text.trim_end_matches('\0').to_string()
        };
        let sig_info = Self {
            signature: field(signature_offset, cb_signature.into()).map(|d| d.to_vec()),
            cert_store: field(cert_store_offset, cb_cert_store.into()).map(|d| d.to_vec()),
            project_name: field(project_name_offset, u64::from(cch_project_name) * 2).map(utf16),
            timestamp,
            timestamp_url: field(timestamp_url_offset, u64::from(cch_timestamp_url) * 2)
                .map(utf16),
        };
        Ok(sig_info)
    }
}
