//! I/O utilities
//!
//! Besides the fixed width integer readers, this module provides the byte-source
//! abstraction the parsers build on:
//! * [`ByteSource`]: any seekable reader with a known size
//! * [`SubsetView`]: a window over a sub-range of another source
//! * [`CompositeView`]: several ranges of one source presented as a single stream
use std::io::{self, Read, Seek, SeekFrom};

/// Single byte `u8` reader
#[inline]
pub fn rdu8<R: Read>(r: &mut R) -> Result<u8, std::io::Error> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

#[inline]
/// Single byte `i8` reader
pub fn rdi8<R: Read>(f: &mut R) -> Result<i8, std::io::Error> {
    let mut buf = [0u8; 1];
    f.read_exact(&mut buf)?;
    Ok(buf[0] as i8)
}

/// Little endian `u16` reader
#[inline]
pub fn rdu16le<R: Read>(r: &mut R) -> Result<u16, std::io::Error> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

#[inline]
/// Little endian `i16` reader
pub fn rdi16le<R: Read>(f: &mut R) -> Result<i16, std::io::Error> {
    let mut buf = [0u8; 2];
    f.read_exact(&mut buf)?;
    Ok(i16::from_le_bytes(buf))
}

/// Big endian `u16` reader
#[inline]
pub fn rdu16be<R: Read>(r: &mut R) -> Result<u16, std::io::Error> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Little endian `u32` reader
#[inline]
pub fn rdu32le<R: Read>(r: &mut R) -> Result<u32, std::io::Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[inline]
/// Little endian `i32` reader
pub fn rdi32le<R: Read>(f: &mut R) -> Result<i32, std::io::Error> {
    let mut buf = [0u8; 4];
    f.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Big endian `u32` reader
#[inline]
pub fn rdu32be<R: Read>(r: &mut R) -> Result<u32, std::io::Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Little endian `u64` reader
#[inline]
pub fn rdu64le<R: Read>(r: &mut R) -> Result<u64, std::io::Error> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[inline]
/// Little endian `i64` reader
pub fn rdi64le<R: Read>(f: &mut R) -> Result<i64, std::io::Error> {
    let mut buf = [0u8; 8];
    f.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Big endian `u64` reader
#[inline]
pub fn rdu64be<R: Read>(r: &mut R) -> Result<u64, std::io::Error> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

#[inline]
/// Little endian `f32` reader
pub fn rdf32le<R: Read>(f: &mut R) -> Result<f32, std::io::Error> {
    let mut buf = [0u8; 4];
    f.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

#[inline]
/// Little endian `f64` reader
pub fn rdf64le<R: Read>(f: &mut R) -> Result<f64, std::io::Error> {
    let mut buf = [0u8; 8];
    f.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

/// A [`Take`](io::Take) that can [`Seek`]
///
/// Adapter which limits the bytes read from an underlying reader, seekable
///
/// Standard Seek semantics are honored
///
/// Changing the stream position of the underlying object outside of this scope
/// yields undefined results
pub struct SeekTake<R: Read + Seek> {
    r: R,
    offset: u64,
    limit: u64,
}

impl<R: Read + Seek> SeekTake<R> {
    /// Creates a new SeekTake
    pub fn new(r: R, limit: u64) -> Self {
        Self {
            r,
            offset: 0,
            limit,
        }
    }

    /// Consumes the struct, returning the underlying value
    pub fn into_inner(self) -> R {
        self.r
    }

    /// Returns the number of bytes that can be read before this instance will return EOF
    pub fn limit(&self) -> u64 {
        self.limit.saturating_sub(self.offset)
    }
}

impl<R: Read + Seek> Read for SeekTake<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let maxlen = usize::try_from(self.limit()).map_or(buf.len(), |l| buf.len().min(l));
        let res = R::read(&mut self.r, &mut buf[0..maxlen]);
        if let Ok(done) = res {
            // sum is safe because the underlaying R is also u64 sized
            self.offset += done as u64;
        }
        res
    }
}

impl<R: Read + Seek> Seek for SeekTake<R> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        fn apply_diff(offset: u64, diff: i64) -> io::Result<u64> {
            if diff >= 0 {
                offset
                    .checked_add(diff as u64)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Seek overflow"))
            } else {
                offset
                    .checked_sub((-diff) as u64)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Seek underflow"))
            }
        }

        let (diff, newoff) = match pos {
            io::SeekFrom::Start(abspos) => (abspos.wrapping_sub(self.offset) as i64, abspos),
            io::SeekFrom::Current(diff) => (diff, apply_diff(self.offset, diff)?),
            io::SeekFrom::End(diff) => {
                let newoff = apply_diff(self.limit, diff)?;
                (newoff.wrapping_sub(self.offset) as i64, newoff)
            }
        };
        self.r.seek(io::SeekFrom::Current(diff))?;
        self.offset = newoff;
        Ok(self.offset)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.offset)
    }
}

/// A seekable source of bytes with a known total size
///
/// Implemented for every [`Read`] + [`Seek`] type
pub trait ByteSource: Read + Seek {
    /// Returns the total size of the source without moving the cursor
    fn size(&mut self) -> io::Result<u64> {
        let cur = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        if cur != end {
            self.seek(SeekFrom::Start(cur))?;
        }
        Ok(end)
    }

    /// Reads up to `n` bytes
    ///
    /// Returns fewer bytes (possibly none) when the end of the source is reached
    fn read_up_to(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut *self).take(n as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<T: Read + Seek + ?Sized> ByteSource for T {}

/// Resolves a seek request against a stream of `len` bytes
///
/// Positions before the start or past the end are rejected
fn resolve_seek(pos: SeekFrom, current: u64, len: u64) -> io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(abspos) => i128::from(abspos),
        SeekFrom::Current(diff) => i128::from(current) + i128::from(diff),
        SeekFrom::End(diff) => i128::from(len) + i128::from(diff),
    };
    if target < 0 || target > i128::from(len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Seek to {target} is out of range (0-{len})"),
        ));
    }
    Ok(target as u64)
}

/// A view over the `[start, start + len)` range of a reader
///
/// Offsets are relative to `start`; reads never return data past `len` and
/// seeking outside the view is an error
///
/// The underlying reader is repositioned lazily, so other users may move it
/// between reads as long as they do not expect it to stay put
pub struct SubsetView<R: Read + Seek> {
    r: R,
    start: u64,
    len: u64,
    offset: u64,
    synced: bool,
}

impl<R: Read + Seek> SubsetView<R> {
    /// Creates a new view
    pub fn new(r: R, start: u64, len: u64) -> io::Result<Self> {
        if start.checked_add(len).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Subset range overflow",
            ));
        }
        Ok(Self {
            r,
            start,
            len,
            offset: 0,
            synced: false,
        })
    }

    /// The length of the view
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The start offset of the view within the underlying reader
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Gets a reference to the underlying reader
    pub fn get_ref(&self) -> &R {
        &self.r
    }

    /// Consumes the view, returning the underlying reader
    pub fn into_inner(self) -> R {
        self.r
    }
}

impl<R: Read + Seek> Read for SubsetView<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let avail = self.len.saturating_sub(self.offset);
        if avail == 0 || buf.is_empty() {
            return Ok(0);
        }
        if !self.synced {
            self.r.seek(SeekFrom::Start(self.start + self.offset))?;
            self.synced = true;
        }
        let maxlen = usize::try_from(avail).map_or(buf.len(), |a| buf.len().min(a));
        let done = self.r.read(&mut buf[0..maxlen]).inspect_err(|_| {
            self.synced = false;
        })?;
        self.offset += done as u64;
        Ok(done)
    }
}

impl<R: Read + Seek> Seek for SubsetView<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let newoff = resolve_seek(pos, self.offset, self.len)?;
        if newoff != self.offset {
            self.offset = newoff;
            self.synced = false;
        }
        Ok(self.offset)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.offset)
    }
}

/// A contiguous range of bytes within a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRun {
    /// Absolute offset of the range
    pub offset: u64,
    /// Length of the range
    pub len: u64,
}

impl ViewRun {
    /// Creates a new run
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }
}

/// Merges physically adjacent runs into single runs
pub fn coalesce_runs<I: IntoIterator<Item = ViewRun>>(runs: I) -> Vec<ViewRun> {
    let mut ret: Vec<ViewRun> = Vec::new();
    for run in runs {
        if run.len == 0 {
            continue;
        }
        if let Some(last) = ret.last_mut() {
            if last.offset.checked_add(last.len) == Some(run.offset) {
                last.len += run.len;
                continue;
            }
        }
        ret.push(run);
    }
    ret
}

/// Scattered ranges of a single reader presented as one logical stream
///
/// Logical offsets grow monotonically across the runs in the order given;
/// reading past the last run yields EOF and seeking past it is an error
///
/// The underlying reader is always repositioned before reading, so it can
/// be shared
pub struct CompositeView<R: Read + Seek> {
    r: R,
    runs: Vec<ViewRun>,
    starts: Vec<u64>,
    len: u64,
    pos: u64,
}

impl<R: Read + Seek> CompositeView<R> {
    /// Creates a new view over `runs`
    pub fn new(r: R, runs: Vec<ViewRun>) -> io::Result<Self> {
        let runs: Vec<ViewRun> = runs.into_iter().filter(|run| run.len > 0).collect();
        let mut starts = Vec::with_capacity(runs.len());
        let mut len = 0u64;
        for run in runs.iter() {
            if run.offset.checked_add(run.len).is_none() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Run range overflow",
                ));
            }
            starts.push(len);
            len = len.checked_add(run.len).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "Composite length overflow")
            })?;
        }
        Ok(Self {
            r,
            runs,
            starts,
            len,
            pos: 0,
        })
    }

    /// The total length of the view
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The runs making up the view
    pub fn runs(&self) -> &[ViewRun] {
        &self.runs
    }

    /// Translates a logical offset into an absolute offset of the underlying reader
    pub fn physical_offset(&self, pos: u64) -> Option<u64> {
        if pos >= self.len {
            return None;
        }
        let idx = match self.starts.binary_search(&pos) {
            Ok(i) => i,
            Err(i) => i - 1, // starts[0] == 0 <= pos
        };
        Some(self.runs[idx].offset + (pos - self.starts[idx]))
    }

    /// Consumes the view, returning the underlying reader
    pub fn into_inner(self) -> R {
        self.r
    }
}

impl<R: Read + Seek> Read for CompositeView<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let idx = match self.starts.binary_search(&self.pos) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let run = &self.runs[idx];
        let within = self.pos - self.starts[idx];
        let avail = run.len - within;
        let maxlen = usize::try_from(avail).map_or(buf.len(), |a| buf.len().min(a));
        self.r.seek(SeekFrom::Start(run.offset + within))?;
        let done = self.r.read(&mut buf[0..maxlen])?;
        self.pos += done as u64;
        Ok(done)
    }
}

impl<R: Read + Seek> Seek for CompositeView<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.len)?;
        Ok(self.pos)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }
}
