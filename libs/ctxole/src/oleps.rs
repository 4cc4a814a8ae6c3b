//! # Low level access to Ole Property Set Streams
//!
//! [`OlePS`] offers support for extracting features and data from *Simple Property Set Streams*
//!
//! The implementation is entirely based on
//! [\[MS-OLEPS\]](https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-oleps/bf7aeae8-c47a-4939-9f45-700158dac3bc).
//!
//! [`OlePS`] provides access to the stream metadata as well as to to its properties through
//! property iterators.
//!
//! Selected properties of the *SummaryInformation* and *DocumentSummaryInformation* sets are
//! decoded into their richer Office form, see [`office`]
//!
//! # Examples
//! ```no_run
//! use std::io::{self,Read,Seek};
//! use ctxole::oleps::{OlePS};
//!
//! fn print_string_properties<R: Read + Seek>(mut f: R) -> Result<(), io::Error> {
//!     let oleps = OlePS::new(&mut f)?;
//!     for (pid, p) in oleps.properties() {
//!         if let Some(s) = p.as_vt_string() {
//!             println!("{pid:x}: {s}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error handling
//!
//! Each property is decoded on its own: a property that fails to decode is reported as
//! [`Property::Invalid`] and does not affect its peers. Sequences (vectors and arrays) which
//! are cut short by the end of the set keep the elements read so far and are flagged as
//! truncated.
//!
//! # Caveats
//!
//! `OlePS` will not honor the *PropertySet* version restrictions and will extract properties that
//! violate the version rules, if they are present

pub mod office;
#[cfg(test)]
mod test;

use crate::config::Config;
use ctxutils::error::{invalid, out_of_range, truncated, unknown_type};
use ctxutils::io::*;
use ctxutils::win32::{Currency, Decimal, Filetime, GUID, variant_time_to_datetime};
use office::OfficeProperty;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::io::{self, Cursor, ErrorKind, Read, Seek, SeekFrom};
use time::PrimitiveDateTime;
use tracing::{debug, warn};

/// A Windows code page identifier
///
/// The specs neglect to state whether it's legal for multiple CodePage properties to appears
/// within a single set. It's empirically possible to demonstrate that Office disregards them and
/// that Windows Explorer instead fails to decode it entirely.
///
/// This implementation follows the Office behavior - i.e. ignores subsequent CodePage properties
/// beyond the first one.
///
/// This implementation defaults to CP1252 in case no such CodePage property appears.
pub type CodePage = u16;
/// The name of a stream or storage holding the value of a property
pub type IndirectPropertyName = CodepageString;

/// The UTF-16LE code page
pub const CP_WINUNICODE: CodePage = 0x4b0;
/// The code page assumed when a set carries none
pub const DEFAULT_CODEPAGE: CodePage = 1252;

/// Property identifier of the Dictionary
pub const PID_DICTIONARY: u32 = 0x0000_0000;
/// Property identifier of the CodePage
pub const PID_CODEPAGE: u32 = 0x0000_0001;
/// Property identifier of the Locale
pub const PID_LOCALE: u32 = 0x8000_0000;
/// Property identifier of the Behavior
pub const PID_BEHAVIOR: u32 = 0x8000_0003;

/// VT_EMPTY
pub const VT_EMPTY: u16 = 0x0000;
/// VT_NULL
pub const VT_NULL: u16 = 0x0001;
/// VT_I2
pub const VT_I2: u16 = 0x0002;
/// VT_I4
pub const VT_I4: u16 = 0x0003;
/// VT_R4
pub const VT_R4: u16 = 0x0004;
/// VT_R8
pub const VT_R8: u16 = 0x0005;
/// VT_CY
pub const VT_CY: u16 = 0x0006;
/// VT_DATE
pub const VT_DATE: u16 = 0x0007;
/// VT_BSTR
pub const VT_BSTR: u16 = 0x0008;
/// VT_ERROR
pub const VT_ERROR: u16 = 0x000A;
/// VT_BOOL
pub const VT_BOOL: u16 = 0x000B;
/// VT_VARIANT (only valid as the base type of a vector or array)
pub const VT_VARIANT: u16 = 0x000C;
/// VT_DECIMAL
pub const VT_DECIMAL: u16 = 0x000E;
/// VT_I1
pub const VT_I1: u16 = 0x0010;
/// VT_UI1
pub const VT_UI1: u16 = 0x0011;
/// VT_UI2
pub const VT_UI2: u16 = 0x0012;
/// VT_UI4
pub const VT_UI4: u16 = 0x0013;
/// VT_I8
pub const VT_I8: u16 = 0x0014;
/// VT_UI8
pub const VT_UI8: u16 = 0x0015;
/// VT_INT
pub const VT_INT: u16 = 0x0016;
/// VT_UINT
pub const VT_UINT: u16 = 0x0017;
/// VT_LPSTR
pub const VT_LPSTR: u16 = 0x001E;
/// VT_LPWSTR
pub const VT_LPWSTR: u16 = 0x001F;
/// VT_FILETIME
pub const VT_FILETIME: u16 = 0x0040;
/// VT_BLOB
pub const VT_BLOB: u16 = 0x0041;
/// VT_STREAM
pub const VT_STREAM: u16 = 0x0042;
/// VT_STORAGE
pub const VT_STORAGE: u16 = 0x0043;
/// VT_STREAMED_OBJECT
pub const VT_STREAMED_OBJECT: u16 = 0x0044;
/// VT_STORED_OBJECT
pub const VT_STORED_OBJECT: u16 = 0x0045;
/// VT_BLOB_OBJECT
pub const VT_BLOB_OBJECT: u16 = 0x0046;
/// VT_CF
pub const VT_CF: u16 = 0x0047;
/// VT_CLSID
pub const VT_CLSID: u16 = 0x0048;
/// VT_VERSIONED_STREAM
pub const VT_VERSIONED_STREAM: u16 = 0x0049;
/// Modifier flag: one-dimensional sequence of the base type
pub const VT_VECTOR: u16 = 0x1000;
/// Modifier flag: multi-dimensional sequence of the base type
pub const VT_ARRAY: u16 = 0x2000;

/// Base types allowed in a VT_VECTOR
const VECTOR_BASES: [u16; 21] = [
    VT_I2, VT_I4, VT_R4, VT_R8, VT_CY, VT_DATE, VT_BSTR, VT_ERROR, VT_BOOL, VT_VARIANT, VT_I1,
    VT_UI1, VT_UI2, VT_UI4, VT_I8, VT_UI8, VT_LPSTR, VT_LPWSTR, VT_FILETIME, VT_CF, VT_CLSID,
];

/// Base types allowed in a VT_ARRAY
const ARRAY_BASES: [u16; 17] = [
    VT_I2, VT_I4, VT_R4, VT_R8, VT_CY, VT_DATE, VT_BSTR, VT_ERROR, VT_BOOL, VT_VARIANT,
    VT_DECIMAL, VT_I1, VT_UI1, VT_UI2, VT_UI4, VT_INT, VT_UINT,
];

#[inline]
fn into_usize<T: TryInto<usize>>(v: T) -> Result<usize, io::Error> {
    TryInto::<usize>::try_into(v).map_err(|_| invalid("Cannot convert value to usize"))
}

/// Number of bytes needed to bring `len` to a multiple of 4
#[inline]
fn padding(len: u64) -> u64 {
    (4 - (len & 3)) & 3
}

/// Reads exactly `size` bytes without trusting `size` for the allocation
fn read_vec<R: Read + Seek>(reader: &mut R, size: u32, what: &str) -> Result<Vec<u8>, io::Error> {
    let size = into_usize(size)?;
    let data = reader.read_up_to(size)?;
    if data.len() != size {
        return Err(truncated(format!(
            "{what} truncated ({} of {size} bytes available)",
            data.len()
        )));
    }
    Ok(data)
}

/// Canonicalizes a code page read from a signed property
///
/// CodePage properties are 16-bit, but some writers store them sign-extended:
/// a negative value `v` stands for `0xFFFF + v + 1`
pub fn canonical_codepage(value: i32) -> CodePage {
    let value = if value < 0 { 0xFFFF + value + 1 } else { value };
    value as CodePage
}

/// Decodes `data` according to the given code page
///
/// Returns `None` if no decoder is available for the code page
pub fn decode_codepage(data: &[u8], codepage: CodePage) -> Option<String> {
    let encoding = if codepage == CP_WINUNICODE {
        encoding_rs::UTF_16LE
    } else {
        codepage::to_encoding(codepage)?
    };
    let (text, _had_errors) = encoding.decode_without_bom_handling(data);
    Some(text.into_owned())
}

pub(crate) fn serialize_hex<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
    hex.serialize(serializer)
}

/// Wrapper around ANSI string
///
/// A CodepageString is self padded: its size prefix and data are always followed by
/// enough padding to reach a multiple of 4 bytes, wherever the string appears.
/// The packed strings found in the DOCPARTS and HEADINGPAIR properties are not
/// CodepageStrings and are handled by [`office`]
#[derive(Clone, PartialEq, Eq)]
pub struct CodepageString {
    /// Contains raw string data, without the terminator
    pub data: Vec<u8>,
    /// The string code page
    pub codepage: CodePage,
    /// Whether the text ends at the first NUL (VT_LPSTR) or may embed NULs (VT_BSTR)
    pub nul_terminated: bool,
}

impl CodepageString {
    /// Creates a new string from raw data
    pub fn new(data: Vec<u8>, codepage: CodePage, nul_terminated: bool) -> Self {
        Self {
            data,
            codepage,
            nul_terminated,
        }
    }

    fn new_noalign<R: Read + Seek>(
        reader: &mut R,
        codepage: CodePage,
        size: u32,
        nul_terminated: bool,
    ) -> Result<Self, io::Error> {
        let mut data = read_vec(reader, size, "CodepageString")?;
        if codepage == CP_WINUNICODE {
            // This is technically invalid, but that's what Windows does
            data.truncate(data.len() & !1);
            if data.ends_with(&[0, 0]) {
                data.truncate(data.len() - 2);
            }
        } else if data.last() == Some(&0) {
            data.pop();
        }
        Ok(Self::new(data, codepage, nul_terminated))
    }

    fn read<R: Read + Seek>(
        reader: &mut R,
        codepage: CodePage,
        nul_terminated: bool,
    ) -> Result<Self, io::Error> {
        let size = rdu32le(reader)?;
        let res = Self::new_noalign(reader, codepage, size, nul_terminated)?;
        reader.seek(SeekFrom::Current(padding(size.into()) as i64))?;
        Ok(res)
    }

    /// Indicates whether the string uses the CP_WINUNICODE (0x04B0) code page
    pub fn is_winunicode(&self) -> bool {
        self.codepage == CP_WINUNICODE
    }

    /// Decodes the text using the string code page
    ///
    /// Returns `None` if the code page has no decoder
    pub fn decode(&self) -> Option<String> {
        let mut text = decode_codepage(&self.data, self.codepage)?;
        if self.nul_terminated {
            if let Some(end) = text.find('\0') {
                text.truncate(end);
            }
        }
        Some(text)
    }

    fn lossy(&self) -> String {
        let data = if self.nul_terminated {
            self.data.split(|b| *b == 0).next().unwrap_or_default()
        } else {
            &self.data
        };
        String::from_utf8_lossy(data).into_owned()
    }
}

impl Display for CodepageString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Some(text) => write!(f, "{text}"),
            None => write!(f, "{}", self.lossy()),
        }
    }
}

impl Debug for CodepageString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodepageString")
            .field("decoded", &self.decode())
            .field("codepage", &self.codepage)
            .field("data", &self.data)
            .finish()
    }
}

impl Serialize for CodepageString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

/// Wrapper around UTF-16 string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicodeString {
    /// Contains raw string data, without the terminator
    pub data: Vec<u8>,
}

impl UnicodeString {
    fn new_noalign<R: Read + Seek>(reader: &mut R, size: u32) -> Result<Self, io::Error> {
        let mut data = read_vec(reader, size, "UnicodeString")?;
        data.truncate(data.len() & !1);
        if data.ends_with(&[0, 0]) {
            data.truncate(data.len() - 2);
        }
        Ok(Self { data })
    }

    /// Decodes the text; embedded NULs are preserved
    pub fn decode(&self) -> String {
        let (text, _had_errors) = encoding_rs::UTF_16LE.decode_without_bom_handling(&self.data);
        text.into_owned()
    }
}

impl Display for UnicodeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.decode())
    }
}

impl Serialize for UnicodeString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.decode().serialize(serializer)
    }
}

/// Represents the typed value of a property in a property set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TypedPropertyValue {
    /// VT_EMPTY (0x0000)
    Empty,
    /// VT_NULL (0x0001)
    Null,
    /// VT_I2 (0x0002)
    I2(i16),
    /// VT_I4 (0x0003)
    I4(i32),
    /// VT_R4 (0x0004)
    R4(f32),
    /// VT_R8 (0x0005)
    R8(f64),
    /// VT_CY (0x0006)
    CY(Currency),
    /// VT_DATE (0x0007)
    Date(Date),
    /// VT_BSTR (0x0008)
    BStr(CodepageString),
    /// VT_ERROR (0x000A)
    Error(Hresult),
    /// VT_BOOL (0x000B)
    Bool(bool),
    /// VT_DECIMAL (0x000E)
    Decimal(Decimal),
    /// VT_I1 (0x0010)
    I1(i8),
    /// VT_UI1 (0x0011)
    UI1(u8),
    /// VT_UI2 (0x0012)
    UI2(u16),
    /// VT_UI4 (0x0013)
    UI4(u32),
    /// VT_I8 (0x0014)
    I8(i64),
    /// VT_UI8 (0x0015)
    UI8(u64),
    /// VT_INT (0x0016)
    Int(i32),
    /// VT_UINT (0x0017)
    UInt(u32),
    /// VT_LPSTR (0x001E)
    LPStr(CodepageString),
    /// VT_LPWSTR (0x001F)
    LPWStr(UnicodeString),
    /// VT_FILETIME (0x0040)
    Filetime(Filetime),
    /// VT_BLOB (0x0041)
    Blob(Blob),
    /// VT_STREAM (0x0042)
    Stream(IndirectPropertyName),
    /// VT_STORAGE (0x0043)
    Storage(IndirectPropertyName),
    /// VT_STREAMED_OBJECT (0x0044)
    StreamedObject(IndirectPropertyName),
    /// VT_STORED_OBJECT (0x0045)
    StoredObject(IndirectPropertyName),
    /// VT_BLOB_OBJECT (0x0046)
    BlobObject(Blob),
    /// VT_CF (0x0047)
    CF(ClipboardData),
    /// VT_CLSID (0x0048)
    Clsid(GUID),
    /// VT_VERSIONED_STREAM (0x0049)
    VersionedStream(VersionedStream),
    /// VT_VECTOR | base type
    Vector(MsVector),
    /// VT_ARRAY | base type
    Array(MsArray),
}

impl TypedPropertyValue {
    /// Reads a property value, type tag included
    ///
    /// The value is aligned as a top level property
    pub fn new<R: Read + Seek>(
        reader: &mut R,
        codepage: CodePage,
        config: &Config,
    ) -> Result<Self, io::Error> {
        let value_type = read_type_tag(reader)?;
        Self::read_value(reader, value_type, codepage, true, config)
    }

    /// Reads the value of a property whose type tag was already consumed
    ///
    /// When `align` is set 1 and 2 byte scalars are padded to 4 bytes
    pub fn read_value<R: Read + Seek>(
        reader: &mut R,
        value_type: u16,
        codepage: CodePage,
        align: bool,
        config: &Config,
    ) -> Result<Self, io::Error> {
        if value_type & VT_VECTOR != 0 && value_type & VT_ARRAY != 0 {
            return Err(unknown_type(format!(
                "Type 0x{value_type:04X} is both a vector and an array"
            )));
        }
        if value_type & VT_VECTOR != 0 {
            return Ok(Self::Vector(MsVector::new(
                reader, value_type, codepage, config,
            )?));
        }
        if value_type & VT_ARRAY != 0 {
            return Ok(Self::Array(MsArray::new(
                reader, value_type, codepage, config,
            )?));
        }
        use TypedPropertyValue as TPV;
        let value = match value_type {
            VT_EMPTY => TPV::Empty,
            VT_NULL => TPV::Null,
            VT_I2 => TPV::I2(i16::from_oleps_reader(reader, codepage, align)?),
            VT_I4 => TPV::I4(i32::from_oleps_reader(reader, codepage, align)?),
            VT_R4 => TPV::R4(f32::from_oleps_reader(reader, codepage, align)?),
            VT_R8 => TPV::R8(f64::from_oleps_reader(reader, codepage, align)?),
            VT_CY => TPV::CY(Currency::from_oleps_reader(reader, codepage, align)?),
            VT_DATE => TPV::Date(Date::from_oleps_reader(reader, codepage, align)?),
            VT_BSTR => TPV::BStr(CodepageString::read(reader, codepage, false)?),
            VT_ERROR => TPV::Error(Hresult::from_oleps_reader(reader, codepage, align)?),
            VT_BOOL => TPV::Bool(bool::from_oleps_reader(reader, codepage, align)?),
            VT_DECIMAL => TPV::Decimal(Decimal::from_oleps_reader(reader, codepage, align)?),
            VT_I1 => TPV::I1(i8::from_oleps_reader(reader, codepage, align)?),
            VT_UI1 => TPV::UI1(u8::from_oleps_reader(reader, codepage, align)?),
            VT_UI2 => TPV::UI2(u16::from_oleps_reader(reader, codepage, align)?),
            VT_UI4 => TPV::UI4(u32::from_oleps_reader(reader, codepage, align)?),
            VT_I8 => TPV::I8(i64::from_oleps_reader(reader, codepage, align)?),
            VT_UI8 => TPV::UI8(u64::from_oleps_reader(reader, codepage, align)?),
            VT_INT => TPV::Int(i32::from_oleps_reader(reader, codepage, align)?),
            VT_UINT => TPV::UInt(u32::from_oleps_reader(reader, codepage, align)?),
            VT_LPSTR => TPV::LPStr(CodepageString::from_oleps_reader(reader, codepage, align)?),
            VT_LPWSTR => TPV::LPWStr(UnicodeString::from_oleps_reader(reader, codepage, align)?),
            VT_FILETIME => TPV::Filetime(Filetime::from_oleps_reader(reader, codepage, align)?),
            VT_BLOB => TPV::Blob(Blob::from_oleps_reader(reader, codepage, align)?),
            VT_STREAM => TPV::Stream(IndirectPropertyName::from_oleps_reader(
                reader, codepage, align,
            )?),
            VT_STORAGE => TPV::Storage(IndirectPropertyName::from_oleps_reader(
                reader, codepage, align,
            )?),
            VT_STREAMED_OBJECT => TPV::StreamedObject(IndirectPropertyName::from_oleps_reader(
                reader, codepage, align,
            )?),
            VT_STORED_OBJECT => TPV::StoredObject(IndirectPropertyName::from_oleps_reader(
                reader, codepage, align,
            )?),
            VT_BLOB_OBJECT => TPV::BlobObject(Blob::from_oleps_reader(reader, codepage, align)?),
            VT_CF => TPV::CF(ClipboardData::from_oleps_reader(reader, codepage, align)?),
            VT_CLSID => TPV::Clsid(GUID::from_oleps_reader(reader, codepage, align)?),
            VT_VERSIONED_STREAM => {
                TPV::VersionedStream(VersionedStream::from_oleps_reader(reader, codepage, align)?)
            }
            _ => {
                return Err(unknown_type(format!(
                    "Unsupported type 0x{:04X}",
                    value_type
                )));
            }
        };
        Ok(value)
    }

    /// Returns the full type tag of the value, modifiers included
    pub fn value_type(&self) -> u16 {
        use TypedPropertyValue as TPV;
        match self {
            TPV::Empty => VT_EMPTY,
            TPV::Null => VT_NULL,
            TPV::I2(_) => VT_I2,
            TPV::I4(_) => VT_I4,
            TPV::R4(_) => VT_R4,
            TPV::R8(_) => VT_R8,
            TPV::CY(_) => VT_CY,
            TPV::Date(_) => VT_DATE,
            TPV::BStr(_) => VT_BSTR,
            TPV::Error(_) => VT_ERROR,
            TPV::Bool(_) => VT_BOOL,
            TPV::Decimal(_) => VT_DECIMAL,
            TPV::I1(_) => VT_I1,
            TPV::UI1(_) => VT_UI1,
            TPV::UI2(_) => VT_UI2,
            TPV::UI4(_) => VT_UI4,
            TPV::I8(_) => VT_I8,
            TPV::UI8(_) => VT_UI8,
            TPV::Int(_) => VT_INT,
            TPV::UInt(_) => VT_UINT,
            TPV::LPStr(_) => VT_LPSTR,
            TPV::LPWStr(_) => VT_LPWSTR,
            TPV::Filetime(_) => VT_FILETIME,
            TPV::Blob(_) => VT_BLOB,
            TPV::Stream(_) => VT_STREAM,
            TPV::Storage(_) => VT_STORAGE,
            TPV::StreamedObject(_) => VT_STREAMED_OBJECT,
            TPV::StoredObject(_) => VT_STORED_OBJECT,
            TPV::BlobObject(_) => VT_BLOB_OBJECT,
            TPV::CF(_) => VT_CF,
            TPV::Clsid(_) => VT_CLSID,
            TPV::VersionedStream(_) => VT_VERSIONED_STREAM,
            TPV::Vector(v) => v.value_type,
            TPV::Array(a) => a.value_type,
        }
    }

    /// Returns the text of string values
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::LPStr(s) | Self::BStr(s) => Some(s.to_string()),
            Self::LPWStr(s) => Some(s.to_string()),
            _ => None,
        }
    }
}

/// Reads a type tag and its padding word
fn read_type_tag<R: Read>(reader: &mut R) -> Result<u16, io::Error> {
    let value_type = rdu16le(reader)?;
    let padding = rdu16le(reader)?;
    if padding != 0 {
        return Err(invalid(format!(
            "Invalid padding {padding:x} found in property with type 0x{value_type:x}"
        )));
    }
    Ok(value_type)
}

/// Represents a Windows Runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hresult {
    /// An integer that describes an error.
    pub value: u32,
}

impl Hresult {
    /// The S (severity) bit: set on failure
    pub fn severity(&self) -> bool {
        self.value & 0x8000_0000 != 0
    }

    /// The R bit (reserved, or severity for NTSTATUS values)
    pub fn reserved(&self) -> bool {
        self.value & 0x4000_0000 != 0
    }

    /// The C bit: set for customer defined values
    pub fn customer(&self) -> bool {
        self.value & 0x2000_0000 != 0
    }

    /// The N bit: set when the value maps a NTSTATUS
    pub fn ntstatus(&self) -> bool {
        self.value & 0x1000_0000 != 0
    }

    /// The X bit: set for message ids
    pub fn msg_id(&self) -> bool {
        self.value & 0x0800_0000 != 0
    }

    /// The facility (11 bits)
    pub fn facility(&self) -> u16 {
        ((self.value >> 16) & 0x7ff) as u16
    }

    /// The status code
    pub fn code(&self) -> u16 {
        (self.value & 0xffff) as u16
    }
}

impl Serialize for Hresult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let result = format!("0x{:08X}", self.value);
        result.serialize(serializer)
    }
}

/// DATE is a type that specifies date and time information.
/// It is represented as an 8-byte floating-point number:
/// * The date information is represented by whole-number increments, starting with December 30, 1899 midnight as time zero.
/// * The time information is represented by the fraction of a day since the preceding midnight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Date {
    /// The raw VariantTime
    pub value: f64,
}

impl Date {
    /// Converts Date to PrimitiveDateTime
    ///
    /// Returns None for values out of range
    pub fn to_datetime(&self) -> Option<PrimitiveDateTime> {
        variant_time_to_datetime(self.value)
    }
}

impl Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{dt}"),
            None => write!(f, "{}", self.value),
        }
    }
}

impl Serialize for Date {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.to_datetime() {
            Some(dt) => dt.to_string().serialize(serializer),
            None => self.value.serialize(serializer),
        }
    }
}

/// The BLOB structure, derived from Binary Large Object, contains information about a block of data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Blob {
    /// The size in bytes of the bytes field.
    pub size: u32,
    /// Vector of bytes
    #[serde(serialize_with = "serialize_hex")]
    pub bytes: Vec<u8>,
}

/// Represents clipboard data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipboardData {
    /// The total size in bytes of the format and data fields.
    pub size: u32,
    /// An application-specific identifier for the format of the data in the data field.
    pub format: u32,
    /// Vector of bytes
    #[serde(serialize_with = "serialize_hex")]
    pub data: Vec<u8>,
}

/// The VersionedStream packet represents a stream with an application-specific version GUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionedStream {
    /// Guid
    pub version_guid: GUID,
    /// Represents the name of a stream
    pub stream_name: IndirectPropertyName,
}

/// One-dimensional sequence of values of the same base type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsVector {
    /// The full type tag (VT_VECTOR | base type)
    pub value_type: u16,
    /// The number of elements declared
    pub declared_len: u32,
    /// The elements
    pub data: Vec<TypedPropertyValue>,
    /// Set if the data ended before all the declared elements were read
    pub truncated: bool,
}

impl MsVector {
    fn new<R: Read + Seek>(
        reader: &mut R,
        value_type: u16,
        codepage: CodePage,
        config: &Config,
    ) -> Result<Self, io::Error> {
        let base = value_type & !VT_VECTOR;
        if !VECTOR_BASES.contains(&base) {
            return Err(unknown_type(format!(
                "Unsupported MsVector type 0x{base:04X}"
            )));
        }
        let start = reader.stream_position()?;
        let declared_len = rdu32le(reader)?;
        if declared_len > config.max_sequence_items {
            return Err(out_of_range(format!(
                "MsVector has too many elements ({declared_len})"
            )));
        }
        let (data, truncated) = read_elements(reader, base, declared_len, codepage, config)?;
        if !truncated {
            let len = reader.stream_position()? - start;
            reader.seek(SeekFrom::Current(padding(len) as i64))?;
        }
        Ok(Self {
            value_type,
            declared_len,
            data,
            truncated,
        })
    }
}

/// Represents the size and index offset of a dimension of an array property type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayDimension {
    /// Size of the dimension
    pub size: u32,
    /// A signed integer representing the index offset of the dimension. For example, an array dimension that is to be accessed with a 0-based index would have the value zero, whereas an array dimension that is to be accessed with a 1-based index would have the value 0x00000001
    pub index_offset: i32,
}

/// Represents the type and dimensions of an array property type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayHeader {
    /// Property type
    pub value_type: u32,
    /// An unsigned integer representing the number of dimensions in the array property. MUST be at least 1 and at most 31.
    pub num_dimensions: u32,
}

/// Multi-dimensional array of values of the same base type
///
/// Elements are stored flat, in the order they appear
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsArray {
    /// The full type tag (VT_ARRAY | base type)
    pub value_type: u16,
    /// Represents the type and dimensions of an array property type
    pub header: ArrayHeader,
    /// Represents the size and index offset of a dimension of an array property type.
    pub dimensions: Vec<ArrayDimension>,
    /// The elements
    pub data: Vec<TypedPropertyValue>,
    /// Set if the data ended before all the declared elements were read
    pub truncated: bool,
}

impl MsArray {
    fn new<R: Read + Seek>(
        reader: &mut R,
        value_type: u16,
        codepage: CodePage,
        config: &Config,
    ) -> Result<Self, io::Error> {
        let base = value_type & !VT_ARRAY;
        if !ARRAY_BASES.contains(&base) {
            return Err(unknown_type(format!("Unsupported MsArray type 0x{base:04X}")));
        }
        let start = reader.stream_position()?;
        let header = ArrayHeader {
            value_type: rdu32le(reader)?,
            num_dimensions: rdu32le(reader)?,
        };
        if header.value_type != u32::from(base) {
            return Err(invalid(format!(
                "MsArray header type 0x{:x} does not match 0x{value_type:04X}",
                header.value_type
            )));
        }
        let num_dimensions = into_usize(header.num_dimensions)?;
        if !(1..=31).contains(&num_dimensions) {
            return Err(invalid(format!(
                "Invalid NumDimensions ({}) in MsArray",
                header.num_dimensions
            )));
        }
        let mut dimensions = Vec::<ArrayDimension>::with_capacity(num_dimensions);
        let mut nitems: u32 = 1;
        for _ in 0..num_dimensions {
            let dimension = ArrayDimension {
                size: rdu32le(reader)?,
                index_offset: rdi32le(reader)?,
            };
            nitems = nitems
                .checked_mul(dimension.size)
                .ok_or_else(|| invalid("Data size overflow in MsArray"))?;
            dimensions.push(dimension);
        }
        if nitems > config.max_sequence_items {
            return Err(out_of_range(format!(
                "MsArray has too many elements ({nitems})"
            )));
        }
        let (data, truncated) = read_elements(reader, base, nitems, codepage, config)?;
        if !truncated {
            let len = reader.stream_position()? - start;
            reader.seek(SeekFrom::Current(padding(len) as i64))?;
        }
        Ok(Self {
            value_type,
            header,
            dimensions,
            data,
            truncated,
        })
    }

    /// The number of elements declared by the dimensions
    pub fn declared_len(&self) -> u64 {
        self.dimensions
            .iter()
            .map(|d| u64::from(d.size))
            .product()
    }
}

/// Reads the elements of a vector or array
///
/// Returns the elements read and whether the data ended prematurely
fn read_elements<R: Read + Seek>(
    reader: &mut R,
    base: u16,
    nitems: u32,
    codepage: CodePage,
    config: &Config,
) -> Result<(Vec<TypedPropertyValue>, bool), io::Error> {
    let mut data = Vec::with_capacity(into_usize(nitems)?.min(1024));
    for _ in 0..nitems {
        let value = if base == VT_VARIANT {
            read_variant_element(reader, codepage, config)
        } else {
            TypedPropertyValue::read_value(reader, base, codepage, false, config)
        };
        match value {
            Ok(v) => data.push(v),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!(
                    "Sequence of type 0x{base:04x} truncated after {} of {nitems} elements",
                    data.len()
                );
                return Ok((data, true));
            }
            Err(e) => return Err(e),
        }
    }
    Ok((data, false))
}

/// Reads a self describing element of a VT_VARIANT sequence
fn read_variant_element<R: Read + Seek>(
    reader: &mut R,
    codepage: CodePage,
    config: &Config,
) -> Result<TypedPropertyValue, io::Error> {
    let value_type = read_type_tag(reader)?;
    if value_type & (VT_VECTOR | VT_ARRAY) != 0 || value_type == VT_VARIANT {
        return Err(unknown_type(format!(
            "Type 0x{value_type:04X} cannot be nested in a variant sequence"
        )));
    }
    TypedPropertyValue::read_value(reader, value_type, codepage, true, config)
}

/// Helper trait
pub trait FromOlepsReader {
    /// Read Object from OlePS, propagate codepage to proper structs
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        codepage: CodePage,
        align: bool,
    ) -> Result<Self, io::Error>
    where
        Self: Sized;
}

impl FromOlepsReader for i8 {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        align: bool,
    ) -> Result<Self, io::Error> {
        let res = rdi8(reader)?;
        if align {
            reader.seek(SeekFrom::Current(3))?;
        }
        Ok(res)
    }
}

impl FromOlepsReader for i16 {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        align: bool,
    ) -> Result<Self, io::Error> {
        let res = rdi16le(reader)?;
        if align {
            reader.seek(SeekFrom::Current(2))?;
        }
        Ok(res)
    }
}

impl FromOlepsReader for i32 {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        rdi32le(reader)
    }
}

impl FromOlepsReader for i64 {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        rdi64le(reader)
    }
}

impl FromOlepsReader for u8 {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        align: bool,
    ) -> Result<Self, io::Error> {
        let res = rdu8(reader)?;
        if align {
            reader.seek(SeekFrom::Current(3))?;
        }
        Ok(res)
    }
}

impl FromOlepsReader for u16 {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        align: bool,
    ) -> Result<Self, io::Error> {
        let res = rdu16le(reader)?;
        if align {
            reader.seek(SeekFrom::Current(2))?;
        }
        Ok(res)
    }
}

impl FromOlepsReader for u32 {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        rdu32le(reader)
    }
}

impl FromOlepsReader for u64 {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        rdu64le(reader)
    }
}

impl FromOlepsReader for f32 {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        rdf32le(reader)
    }
}

impl FromOlepsReader for f64 {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        rdf64le(reader)
    }
}

impl FromOlepsReader for bool {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        align: bool,
    ) -> Result<Self, io::Error> {
        let data = rdu16le(reader)?;
        let res = match data {
            0xFFFF => true,
            0x0000 => false,
            _ => {
                debug!("Non canonical VT_BOOL value 0x{data:04x}");
                true
            }
        };
        if align {
            reader.seek(SeekFrom::Current(2))?;
        }
        Ok(res)
    }
}

impl FromOlepsReader for Hresult {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        Ok(Hresult {
            value: rdu32le(reader)?,
        })
    }
}

impl FromOlepsReader for Currency {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        Ok(Currency {
            value: rdi64le(reader)?,
        })
    }
}

impl FromOlepsReader for Date {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        Ok(Date {
            value: rdf64le(reader)?,
        })
    }
}

impl FromOlepsReader for Filetime {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        Filetime::from_le_stream(reader)
    }
}

impl FromOlepsReader for Decimal {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        let _reserved = rdu16le(reader)?;
        let scale = rdu8(reader)?;
        let sign = rdu8(reader)?;
        let hi32 = rdu32le(reader)?;
        let lo64 = rdu64le(reader)?;
        Decimal::from_parts(hi32, lo64, scale, sign)
    }
}

impl FromOlepsReader for Blob {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        let size = rdu32le(reader)?;
        let bytes = read_vec(reader, size, "Blob")?;
        reader.seek(SeekFrom::Current(padding(size.into()) as i64))?;
        Ok(Blob { bytes, size })
    }
}

impl FromOlepsReader for ClipboardData {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        let size = rdu32le(reader)?;
        if size < 4 {
            return Err(invalid(format!("Invalid ClipboardData size {size}")));
        }
        let format = rdu32le(reader)?;
        let data = read_vec(reader, size - 4, "ClipboardData")?;
        reader.seek(SeekFrom::Current(padding(size.into()) as i64))?;
        Ok(ClipboardData { size, format, data })
    }
}

impl FromOlepsReader for GUID {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        GUID::from_le_stream(reader)
    }
}

impl FromOlepsReader for VersionedStream {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        codepage: CodePage,
        align: bool,
    ) -> Result<Self, io::Error> {
        let version_guid = GUID::from_le_stream(reader)?;
        let stream_name = IndirectPropertyName::from_oleps_reader(reader, codepage, align)?;
        Ok(VersionedStream {
            version_guid,
            stream_name,
        })
    }
}

impl FromOlepsReader for CodepageString {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        CodepageString::read(reader, codepage, true)
    }
}

impl FromOlepsReader for UnicodeString {
    fn from_oleps_reader<R: Read + Seek>(
        reader: &mut R,
        _codepage: CodePage,
        _align: bool,
    ) -> Result<Self, io::Error> {
        let nchars = rdu32le(reader)?;
        let size = nchars
            .checked_mul(2)
            .ok_or_else(|| invalid("UnicodeString size overflow"))?;
        let res = UnicodeString::new_noalign(reader, size)?;
        // Realign in case length is odd
        let padlen = (nchars & 1) * 2;
        reader.seek(SeekFrom::Current(i64::from(padlen)))?;
        Ok(res)
    }
}

/// Represents a mapping between a property identifier and a property name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DictionaryEntry {
    /// Property identifier
    pub property_identifier: u32,
    /// Name length, in characters
    pub length: u32,
    /// Property name
    pub name: CodepageString,
}

impl DictionaryEntry {
    fn new<R: Read + Seek>(reader: &mut R, codepage: CodePage) -> Result<Self, io::Error> {
        let property_identifier = rdu32le(reader)?;
        let length = rdu32le(reader)?;

        // Note: DictionaryEntry.Name is not a CodepageString because:
        // - size is in chars, not bytes
        // - it is not padded unless it's in CP_WINUNICODE
        let name = if codepage == CP_WINUNICODE {
            let size = length
                .checked_mul(2)
                .ok_or_else(|| invalid("DictionaryEntry size overflow"))?;
            let s = CodepageString::new_noalign(reader, codepage, size, true)?;
            let padlen = (length & 1) * 2;
            reader.seek(SeekFrom::Current(i64::from(padlen)))?;
            s
        } else {
            CodepageString::new_noalign(reader, codepage, length, true)?
        };
        Ok(DictionaryEntry {
            property_identifier,
            length,
            name,
        })
    }
}

/// Represents all mappings between property identifiers and property names in a property set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dictionary {
    /// Number of entries in the Dictionary
    pub num_entries: u32,
    /// List of entries
    pub entries: Vec<DictionaryEntry>,
}

impl Dictionary {
    /// Reads a Dictionary encoded with the given code page
    pub fn new<R: Read + Seek>(
        reader: &mut R,
        codepage: CodePage,
        config: &Config,
    ) -> Result<Self, io::Error> {
        let start_offset = reader.stream_position()?;
        let num_entries = rdu32le(reader)?;
        if num_entries > config.max_dictionary_entries {
            return Err(out_of_range(format!(
                "Dictionary has too many entries ({num_entries})"
            )));
        }
        let mut entries = Vec::<DictionaryEntry>::with_capacity(into_usize(num_entries)?.min(256));
        for _ in 0..num_entries {
            entries.push(DictionaryEntry::new(reader, codepage)?);
        }
        let end_offset = reader.stream_position()?;
        reader.seek(SeekFrom::Current(padding(end_offset - start_offset) as i64))?;
        Ok(Dictionary {
            num_entries,
            entries,
        })
    }

    /// Returns the property names keyed by property identifier
    ///
    /// Should an identifier appear more than once, the first name is kept
    pub fn as_map(&self) -> BTreeMap<u32, String> {
        let mut map = BTreeMap::new();
        for entry in &self.entries {
            map.entry(entry.property_identifier)
                .or_insert_with(|| entry.name.to_string());
        }
        map
    }

    /// Returns the name of a property
    pub fn name_of(&self, property_identifier: u32) -> Option<String> {
        self.entries
            .iter()
            .find(|e| e.property_identifier == property_identifier)
            .map(|e| e.name.to_string())
    }
}

/// A typed value associated with a property identifier and optionally a property name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Property {
    /// The TypedPropertyValue structure
    TypedPropertyValue(TypedPropertyValue),
    /// The Dictionary structure
    Dictionary(Dictionary),
    /// A value decoded into its Office specific form
    Office(OfficeProperty),
    /// An improperly encoded element
    Invalid(String),
}

impl Property {
    /// Returns the text of string values
    pub fn as_vt_string(&self) -> Option<String> {
        match self {
            Self::TypedPropertyValue(TypedPropertyValue::LPStr(s)) => Some(s.to_string()),
            Self::TypedPropertyValue(TypedPropertyValue::LPWStr(s)) => Some(s.to_string()),
            _ => None,
        }
    }

    /// Returns the generic value, if any
    pub fn as_typed_value(&self) -> Option<&TypedPropertyValue> {
        match self {
            Self::TypedPropertyValue(v) => Some(v),
            _ => None,
        }
    }

    /// Indicates whether the property failed to decode
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

/// A property in a property set, along with its location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyEntry {
    /// Property identifier
    pub property_identifier: u32,
    /// Offset of the property from the start of the set
    pub offset: u32,
    /// The type tag, when readable (never set for the Dictionary)
    pub value_type: Option<u16>,
    /// Number of bytes taken by the property, when decoded
    pub size: Option<u64>,
    /// The decoded property
    pub property: Property,
}

/// The PropertySet packet represents a property set.
#[derive(Debug, Clone, Serialize)]
pub struct PropertySet {
    /// Format identifier of the set
    pub fmtid: GUID,
    /// total size in bytes of the PropertySet packet.
    pub size: u32,
    /// number of properties in the property set.
    pub num_properties: u32,
    /// The properties, in the order of the identifier/offset table
    pub entries: Vec<PropertyEntry>,
    /// The code page in use for this set
    pub codepage: CodePage,
    /// Indicates that no code page was set (fallback CP1252 will be used)
    pub missing_cp: bool,
    /// Indicates multiple attempts to set the code page were encountered (and ignored)
    pub multiple_cps: bool,
    /// Non fatal oddities
    pub anomalies: Vec<String>,
}

impl PropertySet {
    /// Reads a property set starting at the current reader position
    pub fn new<R: Read + Seek>(
        reader: &mut R,
        fmtid: GUID,
        config: &Config,
    ) -> Result<Self, io::Error> {
        let size = rdu32le(reader)?;
        if size < 8 {
            return Err(invalid(format!("Invalid PropertySet size {size}")));
        }
        if u64::from(size) > config.max_property_set_size {
            return Err(out_of_range(format!(
                "PropertySet size {size} exceeds the limit"
            )));
        }
        let mut data = size.to_le_bytes().to_vec();
        data.extend(read_vec(reader, size - 4, "PropertySet")?);
        let mut cursor = Cursor::new(data);
        cursor.seek(SeekFrom::Start(4))?;
        let num_properties = rdu32le(&mut cursor)?;
        if u64::from(num_properties) * 8 > u64::from(size - 8) {
            return Err(out_of_range(format!(
                "PropertySet with {num_properties} properties does not fit in {size} bytes"
            )));
        }

        // Read property types and offsets
        let mut pairs = Vec::<(u32, u32)>::with_capacity(into_usize(num_properties)?);
        for _ in 0..num_properties {
            let pid = rdu32le(&mut cursor)?;
            let offset = rdu32le(&mut cursor)?;
            pairs.push((pid, offset));
        }
        let mut anomalies = Vec::new();

        // Find and read the codepage for this stream or fallback to cp1252
        let mut maybe_cp: Option<CodePage> = None;
        let mut cp_iter = pairs.iter().filter(|(pid, _)| *pid == PID_CODEPAGE);
        if let Some((_, offset)) = cp_iter.next() {
            cursor.seek(SeekFrom::Start(u64::from(*offset)))?;
            match TypedPropertyValue::new(&mut cursor, 0, config) {
                Ok(TypedPropertyValue::I2(cp)) => maybe_cp = Some(canonical_codepage(cp.into())),
                Ok(TypedPropertyValue::UI2(cp)) => maybe_cp = Some(cp),
                Ok(other) => anomalies.push(format!(
                    "CodePage property has type 0x{:04x}",
                    other.value_type()
                )),
                Err(e) => anomalies.push(format!("Failed to read the CodePage property: {e}")),
            }
        }
        let multiple_cps = cp_iter.next().is_some();
        if multiple_cps {
            anomalies.push("Multiple CodePage properties".to_string());
        }
        let codepage = maybe_cp.unwrap_or(DEFAULT_CODEPAGE);
        if decode_codepage(&[], codepage).is_none() {
            debug!("No decoder for code page {codepage}, strings are left undecoded");
        }

        // The dictionary is needed upfront to locate named Office properties
        let dictionary = pairs
            .iter()
            .find(|(pid, _)| *pid == PID_DICTIONARY)
            .and_then(|(_, offset)| {
                cursor.seek(SeekFrom::Start(u64::from(*offset))).ok()?;
                Dictionary::new(&mut cursor, codepage, config).ok()
            });

        // Read the property values with the correct codepage now in place
        let mut entries = Vec::<PropertyEntry>::with_capacity(pairs.len());
        for (pid, offset) in pairs {
            let decoded = Self::read_property(
                &mut cursor,
                &fmtid,
                pid,
                offset,
                codepage,
                dictionary.as_ref(),
                config,
            );
            let entry = match decoded {
                Ok((property, value_type, size)) => PropertyEntry {
                    property_identifier: pid,
                    offset,
                    value_type,
                    size: Some(size),
                    property,
                },
                Err(e) => {
                    warn!("Failed to decode property 0x{pid:x} at offset 0x{offset:x}: {e}");
                    anomalies.push(format!("Property 0x{pid:x}: {e}"));
                    let value_type = if pid == PID_DICTIONARY {
                        None
                    } else {
                        peek_type_tag(&mut cursor, offset)
                    };
                    PropertyEntry {
                        property_identifier: pid,
                        offset,
                        value_type,
                        size: None,
                        property: Property::Invalid(e.to_string()),
                    }
                }
            };
            entries.push(entry);
        }
        debug!(
            "PropertySet {fmtid}: {} properties, code page {codepage}",
            entries.len()
        );

        Ok(PropertySet {
            fmtid,
            size,
            num_properties,
            entries,
            codepage,
            missing_cp: maybe_cp.is_none(),
            multiple_cps,
            anomalies,
        })
    }

    fn read_property(
        cursor: &mut Cursor<Vec<u8>>,
        fmtid: &GUID,
        pid: u32,
        offset: u32,
        codepage: CodePage,
        dictionary: Option<&Dictionary>,
        config: &Config,
    ) -> Result<(Property, Option<u16>, u64), io::Error> {
        let size = cursor.get_ref().len() as u64;
        let start = u64::from(offset);
        if start < 8 || start >= size {
            return Err(out_of_range(format!(
                "Property offset 0x{offset:x} is outside the set"
            )));
        }
        cursor.seek(SeekFrom::Start(start))?;
        if pid == PID_DICTIONARY {
            let dictionary = Dictionary::new(cursor, codepage, config)?;
            return Ok((
                Property::Dictionary(dictionary),
                None,
                cursor.position() - start,
            ));
        }
        let value_type = read_type_tag(cursor)?;
        let value_start = cursor.position();
        if let Some(overlay) = office::overlay_for(fmtid, pid, value_type, dictionary) {
            match overlay.decode(cursor, value_type, codepage, config) {
                Ok(p) => {
                    return Ok((
                        Property::Office(p),
                        Some(value_type),
                        cursor.position() - start,
                    ));
                }
                Err(e) => {
                    debug!("Office decoding of property 0x{pid:x} failed ({e}), using the generic form");
                    cursor.seek(SeekFrom::Start(value_start))?;
                }
            }
        }
        let value = TypedPropertyValue::read_value(cursor, value_type, codepage, true, config)?;
        Ok((
            Property::TypedPropertyValue(value),
            Some(value_type),
            cursor.position() - start,
        ))
    }

    /// Returns the Dictionary of the set, if present and valid
    pub fn dictionary(&self) -> Option<&Dictionary> {
        self.entries.iter().find_map(|e| match &e.property {
            Property::Dictionary(d) => Some(d),
            _ => None,
        })
    }

    /// Returns the first property with the given identifier
    pub fn get(&self, property_identifier: u32) -> Option<&Property> {
        self.entries
            .iter()
            .find(|e| e.property_identifier == property_identifier)
            .map(|e| &e.property)
    }

    /// Iterates over the properties of the set
    pub fn properties(&self) -> impl Iterator<Item = (u32, &Property)> {
        self.entries
            .iter()
            .map(|e| (e.property_identifier, &e.property))
    }

    /// Indicates whether any property failed to decode
    pub fn is_partial(&self) -> bool {
        self.entries.iter().any(|e| e.property.is_invalid())
    }
}

fn peek_type_tag(cursor: &mut Cursor<Vec<u8>>, offset: u32) -> Option<u16> {
    cursor.seek(SeekFrom::Start(u64::from(offset))).ok()?;
    rdu16le(cursor).ok()
}

/// The header of a PropertySetStream
#[derive(Debug, Clone, Serialize)]
pub struct PropertySetStreamHeader {
    /// MUST be 0xFFFE
    pub byte_order: u16,
    /// Version (0 or 1)
    pub version: u16,
    /// Application and OS information
    pub system_identifier: u32,
    /// Application defined CLSID
    pub clsid: GUID,
    /// Number of property sets (1 or 2)
    pub num_property_sets: u32,
    /// FMTID of the first set
    pub fmtid0: GUID,
    /// Offset of the first set from the start of the stream
    pub offset0: u32,
    /// FMTID of the second set
    pub fmtid1: Option<GUID>,
    /// Offset of the second set from the start of the stream
    pub offset1: Option<u32>,
    /// Non fatal oddities
    pub anomalies: Vec<String>,
}

impl PropertySetStreamHeader {
    /// Reads the header from the current position
    pub fn new<R: Read>(reader: &mut R) -> Result<Self, io::Error> {
        let mut anomalies = Vec::new();
        let byte_order = rdu16le(reader)?;
        if byte_order != 0xFFFE {
            warn!("Unexpected byte order 0x{byte_order:04x}");
            anomalies.push(format!("Invalid ByteOrder ({byte_order:04x})"));
        }
        let version = rdu16le(reader)?;
        if version > 1 {
            anomalies.push(format!("Invalid Version ({version:04x})"));
        }
        let system_identifier = rdu32le(reader)?;
        let clsid = GUID::from_le_stream(reader)?;
        let num_property_sets = rdu32le(reader)?;
        if num_property_sets > 2 {
            return Err(invalid(format!(
                "Invalid NumPropertySets ({num_property_sets})"
            )));
        }
        if num_property_sets == 0 {
            anomalies.push("No property sets".to_string());
        }
        let fmtid0 = GUID::from_le_stream(reader)?;
        let offset0 = rdu32le(reader)?;
        let (fmtid1, offset1) = if num_property_sets == 2 {
            (Some(GUID::from_le_stream(reader)?), Some(rdu32le(reader)?))
        } else {
            (None, None)
        };
        Ok(Self {
            byte_order,
            version,
            system_identifier,
            clsid,
            num_property_sets,
            fmtid0,
            offset0,
            fmtid1,
            offset1,
            anomalies,
        })
    }

    /// Returns the FMTID and offset of each property set in the stream
    pub fn sets(&self) -> Vec<(GUID, u32)> {
        let mut ret = Vec::with_capacity(2);
        if self.num_property_sets > 0 {
            ret.push((self.fmtid0, self.offset0));
        }
        if let (Some(fmtid), Some(offset)) = (self.fmtid1, self.offset1) {
            ret.push((fmtid, offset));
        }
        ret
    }
}

/// The PropertySetStream: a header followed by one or two property sets
#[derive(Debug, Clone, Serialize)]
pub struct OlePS {
    /// The stream header
    pub header: PropertySetStreamHeader,
    property_set: Vec<PropertySet>,
    /// Non fatal oddities
    pub anomalies: Vec<String>,
}

impl OlePS {
    /// Parses a PropertySetStream with the default limits
    pub fn new<R: Read + Seek>(reader: &mut R) -> Result<Self, io::Error> {
        Self::with_config(reader, &Config::default())
    }

    /// Parses a PropertySetStream
    ///
    /// Offsets are relative to the reader position at the time of the call
    pub fn with_config<R: Read + Seek>(reader: &mut R, config: &Config) -> Result<Self, io::Error> {
        let mut reader = SeekTake::new(reader, config.max_property_set_size);
        let header = PropertySetStreamHeader::new(&mut reader)?;
        let mut anomalies = header.anomalies.clone();
        let mut property_set = Vec::<PropertySet>::new();
        for (fmtid, offset) in header.sets() {
            let ps = reader
                .seek(SeekFrom::Start(u64::from(offset)))
                .and_then(|_| PropertySet::new(&mut reader, fmtid, config));
            match ps {
                Ok(ps) => {
                    anomalies.extend(ps.anomalies.iter().cloned());
                    property_set.push(ps);
                }
                Err(e) if property_set.is_empty() => return Err(e),
                Err(e) => {
                    warn!("Failed to read property set {fmtid}: {e}");
                    anomalies.push(format!("Property set {fmtid}: {e}"));
                }
            }
        }
        debug!("PropertySetStream with {} sets", property_set.len());
        Ok(Self {
            header,
            property_set,
            anomalies,
        })
    }

    /// Returns the property sets
    pub fn property_sets(&self) -> &[PropertySet] {
        &self.property_set
    }

    /// Iterates over the properties of all sets
    pub fn properties(&self) -> impl Iterator<Item = (u32, &Property)> {
        self.property_set.iter().flat_map(|ps| ps.properties())
    }

    /// Iterates over the properties of the first set
    pub fn properties_0(&self) -> impl Iterator<Item = (u32, &Property)> {
        self.property_set
            .iter()
            .take(1)
            .flat_map(|ps| ps.properties())
    }

    /// Iterates over the properties of the second set
    pub fn properties_1(&self) -> impl Iterator<Item = (u32, &Property)> {
        self.property_set
            .iter()
            .skip(1)
            .take(1)
            .flat_map(|ps| ps.properties())
    }

    /// Indicates whether any set or property failed to decode
    pub fn is_partial(&self) -> bool {
        self.property_set.len() < self.header.sets().len()
            || self.property_set.iter().any(|ps| ps.is_partial())
    }
}
