//! Win32 structs and fns
//!
//! Primitive Windows types found in binary formats, each keeping its raw
//! representation next to the conversion into a native value
use crate::error::invalid;
#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};
use std::fmt::{self, Debug, Display};
use std::io::{self, Read};
use std::str::FromStr;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

/// A Win32 GUID
#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct GUID {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

impl GUID {
    /// Create a null (all zeroes) GUID
    pub const fn null() -> Self {
        Self {
            data1: 0,
            data2: 0,
            data3: 0,
            data4: [0u8; 8],
        }
    }

    /// Create a GUID from its fields
    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    /// Create a GUID from 16 raw bytes
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; 16] = bytes.try_into().ok()?;
        Some(Self::from_le_array(bytes))
    }

    fn from_le_array(bytes: &[u8; 16]) -> Self {
        let [a0, a1, a2, a3, b0, b1, c0, c1, d @ ..] = *bytes;
        Self {
            data1: u32::from_le_bytes([a0, a1, a2, a3]),
            data2: u16::from_le_bytes([b0, b1]),
            data3: u16::from_le_bytes([c0, c1]),
            data4: d,
        }
    }

    /// Create a GUID from a [`Read`] stream
    pub fn from_le_stream<R: Read>(f: &mut R) -> Result<Self, io::Error> {
        let mut guid = [0u8; 16];
        f.read_exact(&mut guid)?;
        Ok(Self::from_le_array(&guid))
    }

    /// The raw fields of the GUID
    pub fn fields(&self) -> (u32, u16, u16, [u8; 8]) {
        (self.data1, self.data2, self.data3, self.data4)
    }

    /// Check whether the GUID is null
    pub fn is_null(&self) -> bool {
        *self == Self::null()
    }
}

impl Display for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
    }
}

#[cfg(feature = "serde")]
impl Serialize for GUID {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl Debug for GUID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self)
    }
}

impl Default for GUID {
    fn default() -> Self {
        Self::null()
    }
}

impl FromStr for GUID {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.as_bytes();
        if s.len() != 36 {
            return Err(());
        }
        if s[8] != b'-' || s[13] != b'-' || s[18] != b'-' || s[23] != b'-' {
            return Err(());
        }
        let le_bytes: [u8; 16] = [
            hex_decode_byte(&s[6..8])?,
            hex_decode_byte(&s[4..6])?,
            hex_decode_byte(&s[2..4])?,
            hex_decode_byte(&s[0..2])?,
            hex_decode_byte(&s[11..13])?,
            hex_decode_byte(&s[9..11])?,
            hex_decode_byte(&s[16..18])?,
            hex_decode_byte(&s[14..16])?,
            hex_decode_byte(&s[19..21])?,
            hex_decode_byte(&s[21..23])?,
            hex_decode_byte(&s[24..26])?,
            hex_decode_byte(&s[26..28])?,
            hex_decode_byte(&s[28..30])?,
            hex_decode_byte(&s[30..32])?,
            hex_decode_byte(&s[32..34])?,
            hex_decode_byte(&s[34..36])?,
        ];
        Self::from_le_bytes(&le_bytes).ok_or(())
    }
}

#[inline]
fn hex_decode_nibble(c: u8) -> Result<u8, ()> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(()),
    }
}

#[inline]
fn hex_decode_byte(s: &[u8]) -> Result<u8, ()> {
    if s.len() != 2 {
        return Err(());
    }
    Ok((hex_decode_nibble(s[0])? << 4) | hex_decode_nibble(s[1])?)
}

/// Translates a windows FILETIME to a [datetime](time::OffsetDateTime)
///
/// Returns None if the date is out of range
pub fn filetime_to_datetime(ftime: u64) -> Option<OffsetDateTime> {
    let ftime = i128::from(ftime);
    let ftime = ftime.checked_sub(116444736000000000)?;
    OffsetDateTime::from_unix_timestamp_nanos(ftime * 100).ok()
}

/// A FILETIME: 100-nanosecond intervals since January 1, 1601 UTC
///
/// The raw value is preserved; conversion is attempted on demand
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Filetime {
    /// The raw tick count
    pub raw: u64,
}

impl Filetime {
    /// Creates a new Filetime
    pub fn new(raw: u64) -> Self {
        Self { raw }
    }

    /// Reads a little endian Filetime from a stream
    pub fn from_le_stream<R: Read>(f: &mut R) -> Result<Self, io::Error> {
        Ok(Self::new(crate::io::rdu64le(f)?))
    }

    /// Converts to a UTC datetime, if in range
    pub fn as_datetime(&self) -> Option<OffsetDateTime> {
        filetime_to_datetime(self.raw)
    }

    /// Interprets the value as an elapsed time rather than a date
    pub fn as_duration(&self) -> Option<Duration> {
        i64::try_from(self.raw)
            .ok()
            .and_then(|ticks| ticks.checked_mul(100))
            .map(Duration::nanoseconds)
    }
}

impl Debug for Filetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filetime")
            .field("raw", &self.raw)
            .field("as_datetime", &self.as_datetime())
            .finish()
    }
}

impl Display for Filetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_datetime() {
            Some(dt) => write!(f, "{dt}"),
            None => write!(f, "{}", self.raw),
        }
    }
}

#[cfg(feature = "serde")]
impl Serialize for Filetime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.as_datetime() {
            Some(dt) => dt.to_string().serialize(serializer),
            None => self.raw.serialize(serializer),
        }
    }
}

/// Translates an OLE automation date (VariantTime) to a [datetime](time::PrimitiveDateTime)
///
/// The whole part counts days since December 30, 1899; the fractional part is
/// the time of day, also for negative values (-1.25 is December 29, 1899 06:00)
///
/// Returns None for NaN, infinities and dates out of range
pub fn variant_time_to_datetime(vtime: f64) -> Option<PrimitiveDateTime> {
    if !vtime.is_finite() || vtime.abs() > 3_000_000f64 {
        return None;
    }
    let epoch = time::Date::from_calendar_date(1899, time::Month::December, 30).ok()?;
    let date = epoch.checked_add(Duration::days(vtime.trunc() as i64))?;
    let millis = (vtime.fract().abs() * 86_400_000f64).round() as i64;
    PrimitiveDateTime::new(date, time::Time::MIDNIGHT).checked_add(Duration::milliseconds(millis))
}

/// An exact decimal number: `value / 10^scale`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Decimal {
    value: i128,
    scale: u8,
}

/// The largest scale a Win32 DECIMAL may carry
pub const DECIMAL_MAX_SCALE: u8 = 28;

impl Decimal {
    /// Creates a Decimal from an unscaled value and a scale
    pub fn new(value: i128, scale: u8) -> Self {
        Self { value, scale }
    }

    /// Creates a Decimal from the fields of a Win32 DECIMAL
    ///
    /// The magnitude is `hi32 * 2^64 + lo64`; a `sign` of 0x80 negates it.
    /// A scale above 28 is an error
    pub fn from_parts(hi32: u32, lo64: u64, scale: u8, sign: u8) -> Result<Self, io::Error> {
        if scale > DECIMAL_MAX_SCALE {
            return Err(invalid(format!("Invalid DECIMAL scale {scale}")));
        }
        let mut value = (i128::from(hi32) << 64) | i128::from(lo64);
        if sign == 0x80 {
            value = -value;
        }
        Ok(Self { value, scale })
    }

    /// The unscaled value
    pub fn value(&self) -> i128 {
        self.value
    }

    /// The number of decimal digits after the point
    pub fn scale(&self) -> u8 {
        self.scale
    }
}

impl Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.value < 0 { "-" } else { "" };
        let magnitude = self.value.unsigned_abs();
        let width = usize::from(self.scale);
        match 10u128.checked_pow(u32::from(self.scale)) {
            Some(_) if self.scale == 0 => write!(f, "{sign}{magnitude}"),
            Some(divisor) => write!(
                f,
                "{sign}{}.{:0width$}",
                magnitude / divisor,
                magnitude % divisor
            ),
            None => write!(f, "{sign}{magnitude}e-{}", self.scale),
        }
    }
}

#[cfg(feature = "serde")]
impl Serialize for Decimal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

/// A CURRENCY value: a signed 64-bit integer scaled by 10,000
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Currency {
    /// The raw scaled value
    pub value: i64,
}

impl Currency {
    /// The exact decimal value, with a scale of 4
    pub fn as_decimal(&self) -> Decimal {
        Decimal::new(i128::from(self.value), 4)
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.as_decimal().to_string();
        write!(f, "{}", s.trim_end_matches('0').trim_end_matches('.'))
    }
}

#[cfg(feature = "serde")]
impl Serialize for Currency {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}
