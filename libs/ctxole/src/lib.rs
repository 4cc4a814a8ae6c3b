//! # A library to read Ole files
//!
//! Provide functionality to read objects in the *Compound File Binary Format*
//! and the *OLE Property Set* serialization stored in their streams
//!
//! The implementation, which is based entirely upon
//! [\[MS-CFB\]](https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/53989ce4-7b05-4f8d-829b-d08d6148375b), is
//! mostly focused towards forensic analysis. For this reason it tries its best to mimic
//! the empirically determinated behaviour of MS products: this includes accepting
//! malformed (when not intentionally evil) content
//!
//! See [Ole] for the main interface documentation and code examples
//!

#![warn(missing_docs)]

pub mod config;
pub mod oleps;

use ctxutils::error::{invalid, out_of_range, truncated};
use ctxutils::io::*;
use ctxutils::win32::*;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::{debug, warn};

/// Marks a sector used by the DIFAT
pub const DIFSECT: u32 = 0xfffffffc;
/// Marks a sector used by the FAT
pub const FATSECT: u32 = 0xfffffffd;
/// Terminates a sector chain
pub const ENDOFCHAIN: u32 = 0xfffffffe;
/// Marks an unallocated sector
pub const FREESECT: u32 = 0xffffffff;
/// The largest regular sector number (and stream id)
pub const MAXREGSID: u32 = 0xfffffffa;
/// The null stream id
pub const NOSTREAM: u32 = 0xffffffff;

/// Streams smaller than this live in the mini stream
pub const MINI_STREAM_CUTOFF: u64 = 0x1000;
const MINI_SECTOR_SIZE: u64 = 64;
const HEADER_SIZE: usize = 512;
const DIR_ENTRY_SIZE: usize = 128;
const OLE_MAGIC: [u8; 8] = [0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];

/// The parser and stream reader for Ole objects
///
/// # Examples
/// ```no_run
/// use ctxole::Ole;
/// use std::fs::File;
/// use std::io::{self, BufReader};
///
/// let f = File::open("MyDocument.doc").unwrap();
/// let ole = Ole::new(BufReader::new(f)).unwrap();
/// let entry = ole.get_entry_by_name("WordDocument").unwrap();
/// let mut reader = ole.get_stream_reader(entry).unwrap();
/// let mut writer: Vec<u8> = Vec::new();
/// io::copy(&mut reader, &mut writer).unwrap();
/// ```
///
/// # Errors
/// Most fuctions return a [`Result<T, std::io::Error>`]
/// * Errors from the IO layer are bubbled
/// * Errors generated in the parser are reported with [`ErrorKind`](std::io::ErrorKind)
///   set to [`InvalidData`](std::io::ErrorKind#variant.InvalidData) (or
///   [`UnexpectedEof`](std::io::ErrorKind#variant.UnexpectedEof) for truncated structures)
///   and carry a [`ParseError`](ctxutils::error::ParseError)
///
pub struct Ole<R: Read + Seek> {
    internal: OleCore<R>,
}

impl<R: Read + Seek> Ole<R> {
    /// Parses an Ole object and collects the relevant characteristics
    pub fn new(reader: R) -> Result<Self, io::Error> {
        Self::new_at(reader, 0)
    }

    /// Parses an Ole object starting at `offset` in `reader`
    ///
    /// Used for containers embedded in other files: all sector offsets are
    /// computed relative to `offset`
    pub fn new_at(reader: R, offset: u64) -> Result<Self, io::Error> {
        Ok(Self {
            internal: OleCore::new(reader, offset)?,
        })
    }

    /// Returns the major and minor versions of the Ole structure as a tuple
    pub fn version(&self) -> (u16, u16) {
        (self.internal.major_version, self.internal.minor_version)
    }

    /// Returns the number of entries in the Ole structure
    pub fn num_entries(&self) -> u32 {
        // Safe: the directory is bounded by the FAT length
        self.internal.entries.len() as u32
    }

    /// Returns all the directory entries, allocated or not, indexed by stream id
    pub fn entries(&self) -> &[OleEntry] {
        &self.internal.entries
    }

    /// Lists the anomalies detected in the main Ole structures
    pub fn anomalies(&self) -> &[String] {
        self.internal.anomalies.as_slice()
    }

    /// Returns the size of a regular sector
    pub fn sector_size(&self) -> u32 {
        self.internal.sector_size
    }

    /// Returns the absolute offset of regular sector `sector`
    pub fn byte_offset(&self, sector: u32) -> Result<u64, io::Error> {
        self.internal.byte_offset(sector)
    }

    /// Returns the sector chain starting at `first` in the FAT
    ///
    /// The chain ends at the first sentinel or out of range value; a start
    /// sector outside the FAT is an error, as is a loop
    pub fn get_fat_chain(&self, first: u32) -> Result<Vec<u32>, io::Error> {
        walk_chain(&self.internal.fat, first, "FAT")
    }

    /// Returns the mini sector chain starting at `first` in the MiniFAT
    pub fn get_minifat_chain(&self, first: u32) -> Result<Vec<u32>, io::Error> {
        walk_chain(&self.internal.minifat, first, "MiniFAT")
    }

    /// Retrieves a directory entry by name
    ///
    /// * Path components must be separated with a `/`
    /// * The `Root Entry` is implied and must be omitted, nor a leading `/` shall be included
    /// * No character mangling is performed, therfore care must be taken with
    ///   "weird" names e.g.: `"\u{5}SummaryInformation"`
    ///
    /// # Examples
    /// ```no_run
    /// use ctxole::Ole;
    /// use std::fs::File;
    /// use std::io::ErrorKind;
    ///
    /// let ole = Ole::new(File::open("MyDocument.doc").unwrap()).unwrap();
    /// let macros = match ole.get_entry_by_name("Macros/VBA/_VBA_PROJECT") {
    ///     Ok(v) => v,
    ///     Err(e) => match e.kind() {
    ///         ErrorKind::NotFound => { panic!("The requested entry could not be found") },
    ///         _ => { panic!("An error occurred: {}", e) }
    ///     }
    /// };
    /// ```
    ///
    /// # Errors
    /// If the entry cannot be found the error returned has [`ErrorKind`](std::io::ErrorKind)
    /// set to [`NotFound`](std::io::ErrorKind#variant.NotFound)
    pub fn get_entry_by_name(&self, name: &str) -> Result<&OleEntry, io::Error> {
        self.internal.get_entry(name)
    }

    /// Retrieves a directory entry by `id`
    ///
    /// Same as [`get_entry_by_name`](Self::get_entry_by_name) but the entry lookup is by `id`
    pub fn get_entry_by_id(&self, id: u32) -> Result<&OleEntry, io::Error> {
        self.internal.entry(id).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "Entry {} is out of range (total entries: {})",
                    id,
                    self.internal.entries.len()
                ),
            )
        })
    }

    /// Returns an iterator that walks the Ole directory tree
    ///
    /// When looking for specific entries, always prefer
    /// [`get_entry_by_name()`](Self::get_entry_by_name) instead
    ///
    /// See the remarks on [`OleEntryIterator`]
    pub fn ftw(&self) -> OleEntryIterator<'_, R> {
        OleEntryIterator {
            ole: &self.internal,
            stack: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Returns the content of the stream with id `sid`
    ///
    /// The stream is assembled from the sectors of its chain: mini sectors
    /// for streams smaller than the cutoff, regular sectors otherwise (and
    /// always for the root entry, which holds the mini stream)
    ///
    /// Unless `slack` is set, the content is truncated to the declared size of
    /// the entry; otherwise the whole last sector is included
    pub fn get_stream(&self, sid: u32, slack: bool) -> Result<OleStream<'_, R>, io::Error> {
        let entry = self.get_entry_by_id(sid)?;
        let runs = self.internal.stream_runs(entry)?;
        let view = CompositeView::new(SharedReader::new(&self.internal.f), runs)?;
        if slack {
            Ok(OleStream::Slack(view))
        } else {
            Ok(OleStream::Exact(SubsetView::new(view, 0, entry.size)?))
        }
    }

    /// Returns a reader for the specified entry
    pub fn get_stream_reader(&self, entry: &OleEntry) -> Result<OleStream<'_, R>, io::Error> {
        self.get_stream(entry.id, false)
    }
}

/// The representation of a *Compound File Directory Entry*
///
/// In principle this can be one of: "Root Entry" (root directory), "Storage Object" (directory)
/// or a "Stream Object" (file)
///
/// In practice this crate is deliberately loose about entries: no entry is rejected;
/// divergences from the specs are logged as anomalies - see
/// [`anomalies`](Self::anomalies) - and [`is_valid`](Self::is_valid) tells
/// whether the entry is structurally sound
///
/// This crate will happily return readers for Storage object entries
#[derive(Debug, Clone, Serialize)]
pub struct OleEntry {
    /// The `id` of the entry
    pub id: u32,
    /// The object type of the entry
    ///
    /// For the unallocated type (0) all the remaining fields are meaningless - see
    /// [`is_allocated`](Self::is_allocated)
    pub objtype: u8,
    /// The `name` of the entry
    pub name: String,
    /// The declared name size in bytes, including the terminator
    pub name_size: u16,
    /// The red/black tree value of the entry
    pub color: u8,
    /// The left sibling
    pub left: u32,
    /// The right sibling
    pub right: u32,
    /// The child (for storage objects)
    pub child: u32,
    /// The entry CLSID
    pub clsid: GUID,
    /// The state of the entry (typically for storage objects)
    pub state: u32,
    /// The creation time of the entry
    pub ctime: Filetime,
    /// The last modification time of the entry
    pub mtime: Filetime,
    /// The first sector of the entry data
    pub start_sector: u32,
    /// The size (in bytes) of the entry
    pub size: u64,
    /// A list of non fatal inconguences found in the entry
    pub anomalies: Vec<String>,
}

impl Default for OleEntry {
    fn default() -> Self {
        OleEntry {
            id: 0,
            name: "".to_string(),
            name_size: 0,
            objtype: 0,
            color: 0,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            clsid: GUID::null(),
            state: 0,
            ctime: Filetime::default(),
            mtime: Filetime::default(),
            start_sector: ENDOFCHAIN,
            size: 0,
            anomalies: Vec::new(),
        }
    }
}

const ILLEGAL_CHARS: &[char] = &['/', '\\', ':', '!'];

impl OleEntry {
    /// Decodes a 128 byte directory entry
    ///
    /// For major version 3 the high half of the stream size is ignored
    pub fn from_bytes(id: u32, buf: &[u8], major_version: u16) -> Result<Self, io::Error> {
        let buf: &[u8; DIR_ENTRY_SIZE] = buf
            .get(0..DIR_ENTRY_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| truncated(format!("Directory entry {id} is truncated")))?;
        let u32_at = |off: usize| u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        let u64_at = |off: usize| u64::from(u32_at(off)) | (u64::from(u32_at(off + 4)) << 32);

        let name_size = u16::from_le_bytes([buf[64], buf[65]]);
        let units: Vec<u16> = buf[0..usize::from(name_size.min(64))]
            .chunks_exact(2)
            .map(|v| u16::from_le_bytes([v[0], v[1]]))
            .take_while(|c| *c != 0)
            .collect();
        let mut ret = OleEntry {
            id,
            objtype: buf[66],
            name: String::from_utf16_lossy(&units),
            name_size,
            color: buf[67],
            left: u32_at(68),
            right: u32_at(72),
            child: u32_at(76),
            clsid: GUID::from_le_bytes(&buf[80..96]).unwrap_or_default(),
            state: u32_at(96),
            ctime: Filetime::new(u64_at(100)),
            mtime: Filetime::new(u64_at(108)),
            start_sector: u32_at(116),
            size: u64_at(120),
            anomalies: Vec::new(),
        };
        if major_version == 3 {
            ret.size &= 0xffffffff;
        }
        if ret.objtype == 0 {
            // Unallocated: the entry is garbage
            return Ok(ret);
        }

        if ret.objtype == 5 && ret.id != 0 {
            ret.anomalies
                .push("Non Root Entry has with a root type".to_string());
        }
        if ![1, 2, 5].contains(&ret.objtype) {
            ret.anomalies
                .push(format!("Invalid object type {}", ret.objtype));
        }
        if name_size == 0 || name_size > 64 || name_size & 1 != 0 {
            ret.anomalies
                .push(format!("Invalid name length {}", name_size));
        } else if units.len() * 2 + 2 != usize::from(name_size) {
            ret.anomalies
                .push("Name is not null terminated at its declared length".to_string());
        }
        if ret.name.contains(ILLEGAL_CHARS) {
            ret.anomalies
                .push(format!("Name \"{}\" contains invalid characters", ret.name));
        }
        if ret.color > 1 {
            ret.anomalies
                .push(format!("Invalid entry color {}", ret.color));
        }
        if !ret.is_storage() && ret.child != NOSTREAM {
            ret.anomalies.push("Stream entry with a child".to_string());
        }
        if ret.objtype == 1 && ret.size > 0 {
            ret.anomalies.push("Storage object with data".to_string());
        }
        Ok(ret)
    }

    /// Returns [true] if the entry is allocated, [false] otherwise
    pub fn is_allocated(&self) -> bool {
        self.objtype > 0
    }

    /// Returns [true] if the entry is a Storage Object or [false] if it's a Stream Object
    pub fn is_storage(&self) -> bool {
        self.objtype == 1 || self.objtype == 5
    }

    /// Returns [true] if the entry is a Stream Object
    pub fn is_stream(&self) -> bool {
        self.objtype == 2
    }

    /// Returns [true] for the Root Entry
    pub fn is_root(&self) -> bool {
        self.id == 0 && self.objtype == 5
    }

    /// Checks the structural validity of the entry
    ///
    /// The name must be non empty and free of `/\:!`, the type one of
    /// 0, 1, 2, 5, the color red or black and each sibling/child
    /// reference either [`NOSTREAM`] or a regular id
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
            && !self.name.contains(ILLEGAL_CHARS)
            && [0, 1, 2, 5].contains(&self.objtype)
            && self.color <= 1
            && [self.left, self.right, self.child]
                .iter()
                .all(|sid| *sid == NOSTREAM || *sid <= MAXREGSID)
    }

    /// Returns [true] if the entry data are stored in the mini stream
    pub fn is_mini(&self) -> bool {
        self.id > 0 && self.size < MINI_STREAM_CUTOFF
    }

    fn left(&self) -> Option<u32> {
        if self.is_allocated() && self.left <= MAXREGSID {
            Some(self.left)
        } else {
            None
        }
    }

    fn right(&self) -> Option<u32> {
        if self.is_allocated() && self.right <= MAXREGSID {
            Some(self.right)
        } else {
            None
        }
    }

    fn child(&self) -> Option<u32> {
        if self.is_storage() && self.child <= MAXREGSID {
            Some(self.child)
        } else {
            None
        }
    }
}

/// Walks a sector chain in `table` starting at `first`
fn walk_chain(table: &[u32], first: u32, what: &str) -> Result<Vec<u32>, io::Error> {
    let lookup = |sector: u32| usize::try_from(sector).ok().and_then(|i| table.get(i).copied());
    let mut cur = lookup(first).ok_or_else(|| {
        out_of_range(format!(
            "{} chain start {} is out of range ({} entries)",
            what,
            first,
            table.len()
        ))
    })?;
    let mut chain = vec![first];
    while cur <= MAXREGSID {
        let Some(next) = lookup(cur) else {
            break;
        };
        if chain.len() >= table.len() {
            return Err(invalid(format!(
                "Loop detected in {} chain starting at {}",
                what, first
            )));
        }
        chain.push(cur);
        cur = next;
    }
    Ok(chain)
}

#[derive(Debug)]
struct OleCore<R: Read + Seek> {
    f: RefCell<R>,
    base: u64,
    major_version: u16,
    minor_version: u16,
    anomalies: Vec<String>,
    sector_size: u32,
    difat: Vec<u32>,
    fat: Vec<u32>,
    minifat: Vec<u32>,
    ministream: Vec<u32>,
    entries: Vec<OleEntry>,
}

impl<R: Read + Seek> OleCore<R> {
    fn new(mut f: R, base: u64) -> Result<Self, io::Error> {
        let file_size = f.size()?;
        let mut header = [0u8; HEADER_SIZE];
        f.seek(SeekFrom::Start(base))?;
        f.read_exact(&mut header)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => truncated("Ole header is truncated"),
                _ => e,
            })?;
        if header[0..8] != OLE_MAGIC {
            return Err(invalid("Not an ole file"));
        }
        let mut ret = Self {
            f: RefCell::new(f),
            base,
            major_version: 0,
            minor_version: 0,
            anomalies: Vec::new(),
            sector_size: 0,
            difat: Vec::new(),
            fat: Vec::new(),
            minifat: Vec::new(),
            ministream: Vec::new(),
            entries: Vec::new(),
        };
        let mut h = &header[8..];

        let clsid = GUID::from_le_stream(&mut h)?;
        if !clsid.is_null() {
            ret.anomalies.push("CLSID is not NULL".to_string());
        }
        ret.minor_version = rdu16le(&mut h)?;
        ret.major_version = rdu16le(&mut h)?;
        if ret.minor_version != 0x003e {
            ret.anomalies.push(format!(
                "Minor version set to {:04x} instead of {:04x}",
                ret.minor_version, 0x003e
            ));
        }
        if ret.major_version < 3 || ret.major_version > 4 {
            ret.anomalies.push(format!(
                "Major version set to {} (expected 3 or 4)",
                ret.major_version
            ));
        }
        let mut tmp16 = rdu16le(&mut h)?;
        if tmp16 != 0xfffe {
            ret.anomalies.push(format!(
                "Byte order set to {:04x} instead of {:04x}",
                tmp16, 0xfffe
            ));
        }
        tmp16 = rdu16le(&mut h)?;
        ret.sector_size = match tmp16 {
            0x9 => {
                if ret.major_version == 4 {
                    ret.anomalies.push(
                        "Major version 4 should have sector size of 4096 bytes instead of 512"
                            .to_string(),
                    );
                }
                512
            }
            0xc => {
                if ret.major_version == 3 {
                    ret.anomalies.push(
                        "Major version 3 should have sector size of 512 bytes instead of 4096"
                            .to_string(),
                    );
                }
                4096
            }
            _ => {
                return Err(invalid(format!("Invalid sector shift {}", tmp16)));
            }
        };

        tmp16 = rdu16le(&mut h)?;
        if tmp16 != 6 {
            ret.anomalies.push(format!(
                "Mini sector shift should be set to 6 but is set to {}",
                tmp16
            ));
        }

        let mut reserved = [0u8; 6];
        h.read_exact(&mut reserved)?;
        if reserved != [0u8; 6] {
            ret.anomalies
                .push("Reserved area is not zeroed".to_string());
        }

        let mut tmp32 = rdu32le(&mut h)?;
        let dir_sectors = if ret.major_version == 3 {
            if tmp32 != 0 {
                ret.anomalies.push(format!(
                    "Number of directory sectors should be 0 for major version 3 but is {}",
                    tmp32
                ));
            }
            0
        } else {
            tmp32
        };
        let fat_sectors = rdu32le(&mut h)?;
        let first_dir_sector = rdu32le(&mut h)?;
        let _transaction_signature = rdu32le(&mut h)?;
        tmp32 = rdu32le(&mut h)?;
        if u64::from(tmp32) != MINI_STREAM_CUTOFF {
            ret.anomalies.push(format!(
                "Mini Stream Cutoff Size should be {:x} but is {:x}",
                MINI_STREAM_CUTOFF, tmp32
            ));
        }
        let first_minifat_sector = rdu32le(&mut h)?;
        let minifat_sectors = rdu32le(&mut h)?;
        let first_difat_sector = rdu32le(&mut h)?;
        let difat_sectors = rdu32le(&mut h)?;

        // Regular sectors available in the file, counting a partial tail
        let sector_size = u64::from(ret.sector_size);
        let max_sect = file_size
            .saturating_sub(base)
            .saturating_sub(sector_size)
            .div_ceil(sector_size);

        // The first 109 difats are inlined in the header
        let mut difat_complete = ret.add_difats_from_buf(h)?;
        let mut difat_chain: Vec<u32> = Vec::new();
        if difat_complete {
            if difat_sectors > 0 {
                ret.anomalies
                    .push(format!("Found {} spurious DIFAT sector(s)", difat_sectors));
            }
        } else if difat_sectors > 0 {
            let mut difat_sector = first_difat_sector;
            for i in 0..difat_sectors {
                if u64::from(difat_sector) >= max_sect {
                    ret.anomalies.push(format!(
                        "DIFAT sector {} (0x{:x}) is out of file",
                        i + 1,
                        difat_sector
                    ));
                    break;
                }
                difat_chain.push(difat_sector);
                let sec = ret.read_sector(difat_sector)?;
                let (entries, nextsec) = sec.split_at(sec.len() - 4);
                difat_complete = ret.add_difats_from_buf(entries)?;
                difat_sector = rdu32le(&mut &nextsec[..])?;
                match difat_sector {
                    ENDOFCHAIN => {
                        if i != difat_sectors - 1 {
                            ret.anomalies.push(format!(
                                "Found ENDOFCHAIN on sector {} but {} were expected",
                                i + 1,
                                difat_sectors
                            ));
                        }
                        break;
                    }
                    DIFSECT | FATSECT | FREESECT => {
                        if i == difat_sectors - 1 {
                            break;
                        }
                        return Err(invalid(format!(
                            "Found next sector with special offset 0x{:x} in DIFAT chain",
                            difat_sector
                        )));
                    }
                    _ => (),
                };
                if difat_complete {
                    if i != difat_sectors - 1 {
                        ret.anomalies.push(format!(
                            "DIFAT completed on sector {} but {} were expected",
                            i + 1,
                            difat_sectors
                        ));
                    }
                    break;
                }
            }
            if difat_sector != ENDOFCHAIN && !difat_complete {
                ret.anomalies.push(format!(
                    "Missing ENDOFCHAIN on last DIFAT sector, found 0x{:x} instead",
                    difat_sector
                ));
            }
        }
        if usize::try_from(fat_sectors).ok() != Some(ret.difat.len()) {
            ret.anomalies.push(format!(
                "Number of FAT sectors in header is {} but {} were found in DIFAT",
                fat_sectors,
                ret.difat.len()
            ));
        }

        ret.fat = ret.read_u32_table(&ret.difat, "FAT")?;
        ret.check_fat_marks(&difat_chain);
        debug!(
            "Ole v{}: {} FAT sector(s), {} FAT entries",
            ret.major_version,
            ret.difat.len(),
            ret.fat.len()
        );

        // Directory
        let dir_chain = walk_chain(&ret.fat, first_dir_sector, "FAT")
            .map_err(|e| invalid(format!("Cannot walk the directory chain: {e}")))?;
        if ret.major_version == 4 && usize::try_from(dir_sectors).ok() != Some(dir_chain.len()) {
            ret.anomalies.push(format!(
                "Directory sector count is {} in the header but only {} are walkable",
                dir_sectors,
                dir_chain.len()
            ));
        }
        ret.read_directory(&dir_chain)?;
        ret.check_root()?;

        // MiniFAT
        if minifat_sectors > 0 && first_minifat_sector <= MAXREGSID {
            let mut minifat_chain = walk_chain(&ret.fat, first_minifat_sector, "FAT")
                .map_err(|e| invalid(format!("Cannot walk the MiniFAT chain: {e}")))?;
            if usize::try_from(minifat_sectors).ok() != Some(minifat_chain.len()) {
                ret.anomalies.push(format!(
                    "MiniFAT sector count is {} in the header but {} are walkable",
                    minifat_sectors,
                    minifat_chain.len()
                ));
                minifat_chain.truncate(usize::try_from(minifat_sectors).unwrap_or(usize::MAX));
            }
            ret.minifat = ret.read_u32_table(&minifat_chain, "MiniFAT")?;
        } else if minifat_sectors > 0 || first_minifat_sector != ENDOFCHAIN {
            ret.anomalies.push(format!(
                "MiniFAT declared with {} sector(s) starting at 0x{:x}",
                minifat_sectors, first_minifat_sector
            ));
        }

        // Mini stream
        let (root_size, root_start) = (ret.entries[0].size, ret.entries[0].start_sector);
        if root_size > 0 && root_start <= MAXREGSID {
            let needed = root_size.div_ceil(sector_size);
            match walk_chain(&ret.fat, root_start, "FAT") {
                Ok(mut chain) => {
                    if (chain.len() as u64) < needed {
                        ret.anomalies.push(format!(
                            "Mini stream needs {} sector(s) but only {} are walkable",
                            needed,
                            chain.len()
                        ));
                    }
                    chain.truncate(usize::try_from(needed).unwrap_or(usize::MAX));
                    ret.ministream = chain;
                }
                Err(e) => {
                    warn!("Unreadable mini stream: {e}");
                    ret.anomalies.push(format!("Unreadable mini stream: {e}"));
                }
            }
        }
        Ok(ret)
    }

    fn add_difats_from_buf(&mut self, buf: &[u8]) -> Result<bool, io::Error> {
        for v in buf.chunks_exact(4) {
            let v = u32::from_le_bytes([v[0], v[1], v[2], v[3]]);
            match v {
                DIFSECT | FATSECT | ENDOFCHAIN => {
                    return Err(invalid(format!(
                        "Found DIFAT sector with special offset 0x{:x}",
                        v
                    )));
                }
                FREESECT => return Ok(true),
                _ => self.difat.push(v),
            }
        }
        Ok(false)
    }

    fn byte_offset(&self, sector: u32) -> Result<u64, io::Error> {
        if sector > MAXREGSID {
            return Err(invalid(format!(
                "Cannot locate special sector 0x{:x}",
                sector
            )));
        }
        (u64::from(sector) + 1)
            .checked_mul(u64::from(self.sector_size))
            .and_then(|off| off.checked_add(self.base))
            .ok_or_else(|| out_of_range(format!("Cannot locate sector {}: overflow", sector)))
    }

    fn read_sector(&self, sector: u32) -> Result<Vec<u8>, io::Error> {
        let offset = self.byte_offset(sector)?;
        let mut f = self.f.borrow_mut();
        f.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; self.sector_size as usize]; // Safe: sector_size is 512 or 4096
        f.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Converts a list of regular sectors into coalesced runs
    fn sector_runs(&self, sectors: &[u32]) -> Result<Vec<ViewRun>, io::Error> {
        let runs = sectors
            .iter()
            .map(|s| Ok(ViewRun::new(self.byte_offset(*s)?, u64::from(self.sector_size))))
            .collect::<Result<Vec<ViewRun>, io::Error>>()?;
        Ok(coalesce_runs(runs))
    }

    /// Reads the sectors as a flat array of u32's
    fn read_u32_table(&self, sectors: &[u32], what: &str) -> Result<Vec<u32>, io::Error> {
        let runs = self.sector_runs(sectors)?;
        let mut view = CompositeView::new(SharedReader::new(&self.f), runs)?;
        let mut buf = Vec::new();
        view.read_to_end(&mut buf)?;
        if (buf.len() as u64) < view.len() {
            return Err(truncated(format!(
                "{} is truncated ({} of {} bytes available)",
                what,
                buf.len(),
                view.len()
            )));
        }
        Ok(buf
            .chunks_exact(4)
            .map(|v| u32::from_le_bytes([v[0], v[1], v[2], v[3]]))
            .collect())
    }

    fn check_fat_marks(&mut self, difat_chain: &[u32]) {
        let mark = |sector: u32| usize::try_from(sector).ok().and_then(|i| self.fat.get(i).copied());
        let mut not_fatsect = false;
        let mut missing_sect = false;
        for sector in self.difat.iter() {
            match mark(*sector) {
                Some(FATSECT) => {}
                Some(_) => not_fatsect = true,
                None => missing_sect = true,
            }
        }
        let not_difsect = difat_chain.iter().any(|s| mark(*s) != Some(DIFSECT));
        if not_fatsect {
            self.anomalies
                .push("One or more FAT sectors are not marked as FATSEC".to_string());
        }
        if missing_sect {
            self.anomalies
                .push("One or more DIFAT sectors are missing from FAT".to_string());
        }
        if not_difsect {
            self.anomalies.push(
                "One or more DIFAT sectors are unreachable or not marked as DIFSECT".to_string(),
            );
        }
    }

    fn read_directory(&mut self, dir_chain: &[u32]) -> Result<(), io::Error> {
        let runs = self.sector_runs(dir_chain)?;
        let mut view = CompositeView::new(SharedReader::new(&self.f), runs)?;
        let mut buf = Vec::new();
        view.read_to_end(&mut buf)?;
        if (buf.len() as u64) < view.len() {
            self.anomalies.push(format!(
                "Directory is truncated ({} of {} bytes available)",
                buf.len(),
                view.len()
            ));
        }
        let mut entries = Vec::with_capacity(buf.len() / DIR_ENTRY_SIZE);
        for (id, rec) in buf.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
            let id = u32::try_from(id).map_err(|_| invalid("Ole directory entries overflow"))?;
            entries.push(OleEntry::from_bytes(id, rec, self.major_version)?);
        }
        debug!("Directory: {} entries", entries.len());
        self.entries = entries;
        Ok(())
    }

    fn check_root(&mut self) -> Result<(), io::Error> {
        let root = self
            .entries
            .first()
            .ok_or_else(|| invalid("Missing Root Entry"))?;
        if root.objtype != 5 {
            return Err(invalid(format!(
                "Invalid Root Entry: type is {} instead of 5",
                root.objtype
            )));
        }
        if root.name != "Root Entry" {
            self.anomalies
                .push(format!("Root Entry name is \"{}\"", root.name));
        }
        if root.ctime.raw != 0 {
            self.anomalies
                .push(format!("Root Entry ctime is non zero ({})", root.ctime));
        }
        if root.color != 1 {
            self.anomalies
                .push("Root Entry color is not black".to_string());
        }
        Ok(())
    }

    fn entry(&self, id: u32) -> Option<&OleEntry> {
        usize::try_from(id).ok().and_then(|i| self.entries.get(i))
    }

    /// Computes the physical runs holding the data of `entry`
    fn stream_runs(&self, entry: &OleEntry) -> Result<Vec<ViewRun>, io::Error> {
        if entry.size == 0 {
            return Ok(Vec::new());
        }
        if !entry.is_mini() {
            let needed = entry.size.div_ceil(u64::from(self.sector_size));
            let mut chain = walk_chain(&self.fat, entry.start_sector, "FAT")?;
            if (chain.len() as u64) < needed {
                return Err(out_of_range(format!(
                    "Entry {} needs {} sector(s) but its FAT chain has {}",
                    entry.id,
                    needed,
                    chain.len()
                )));
            }
            chain.truncate(needed as usize); // Safe: needed <= chain.len()
            return self.sector_runs(&chain);
        }

        let needed = entry.size.div_ceil(MINI_SECTOR_SIZE);
        let mut chain = walk_chain(&self.minifat, entry.start_sector, "MiniFAT")?;
        if (chain.len() as u64) < needed {
            return Err(out_of_range(format!(
                "Entry {} needs {} mini sector(s) but its MiniFAT chain has {}",
                entry.id,
                needed,
                chain.len()
            )));
        }
        chain.truncate(needed as usize); // Safe: needed <= chain.len()
        let runs = chain
            .iter()
            .map(|ms| {
                Ok(ViewRun::new(
                    self.mini_sector_offset(*ms)?,
                    MINI_SECTOR_SIZE,
                ))
            })
            .collect::<Result<Vec<ViewRun>, io::Error>>()?;
        Ok(coalesce_runs(runs))
    }

    /// Translates a mini sector number into an absolute offset
    fn mini_sector_offset(&self, mini_sector: u32) -> Result<u64, io::Error> {
        let position = u64::from(mini_sector) * MINI_SECTOR_SIZE; // always safe
        let sector_size = u64::from(self.sector_size);
        let sector = usize::try_from(position / sector_size)
            .ok()
            .and_then(|i| self.ministream.get(i))
            .ok_or_else(|| {
                out_of_range(format!(
                    "Mini sector {} is out of the mini stream",
                    mini_sector
                ))
            })?;
        Ok(self.byte_offset(*sector)? + position % sector_size)
    }

    fn get_entry(&self, name: &str) -> Result<&OleEntry, io::Error> {
        let not_found = || {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Directory entry {} not found", name),
            )
        };
        let root = self.entries.first().ok_or_else(not_found)?;
        let name = name.trim_start_matches('/');
        if name.is_empty() {
            return Ok(root);
        }
        let mut nextid = root.child;
        let mut cur = root;
        let mut steps: usize = 0;
        for part in name.to_uppercase().split('/') {
            let part_len = part.encode_utf16().count();
            loop {
                if steps >= self.entries.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!(
                            "Search aborted after {} steps: probable loop in the directory tree",
                            steps
                        ),
                    ));
                }
                cur = self.entry(nextid).ok_or_else(not_found)?;
                let cname = &cur.name.to_uppercase();
                let cname_len = cname.encode_utf16().count();
                /* FIXME String comparison should use Unicode Default Case Conversion Algorithm, simple
                 * case conversion variant (simple case foldings) which is not exposed by std
                 * See https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-cfb/d30e462c-5f8a-435b-9c4c-cc0b9ea89956
                 */
                steps += 1;
                nextid = if part_len < cname_len {
                    cur.left
                } else if part_len > cname_len {
                    cur.right
                } else if part < cname.as_str() {
                    cur.left
                } else if part > cname.as_str() {
                    cur.right
                } else {
                    break;
                };
            }
            steps += 1;
            nextid = cur.child;
        }
        Ok(cur)
    }
}

/// A [`Read`] + [`Seek`] handle on a reader shared through a [`RefCell`]
///
/// Each operation borrows the reader for its own duration only
pub struct SharedReader<'a, R: Read + Seek> {
    f: &'a RefCell<R>,
}

impl<'a, R: Read + Seek> SharedReader<'a, R> {
    fn new(f: &'a RefCell<R>) -> Self {
        Self { f }
    }
}

impl<R: Read + Seek> Read for SharedReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.f.borrow_mut().read(buf)
    }
}

impl<R: Read + Seek> Seek for SharedReader<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.f.borrow_mut().seek(pos)
    }
}

/// The content of an Ole stream
///
/// Either cut at the declared stream size ([`Exact`](Self::Exact)) or including
/// the unused tail of the last sector ([`Slack`](Self::Slack))
pub enum OleStream<'a, R: Read + Seek> {
    /// The stream data
    Exact(SubsetView<CompositeView<SharedReader<'a, R>>>),
    /// The stream data plus sector slack
    Slack(CompositeView<SharedReader<'a, R>>),
}

impl<R: Read + Seek> OleStream<'_, R> {
    /// The length of the stream
    pub fn len(&self) -> u64 {
        match self {
            Self::Exact(v) => v.len(),
            Self::Slack(v) => v.len(),
        }
    }

    /// Whether the stream is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The physical runs the stream is made of
    pub fn runs(&self) -> Vec<ViewRun> {
        match self {
            Self::Exact(v) => {
                let mut left = v.len();
                let mut ret = Vec::new();
                for run in v.get_ref().runs() {
                    if left == 0 {
                        break;
                    }
                    let len = run.len.min(left);
                    ret.push(ViewRun::new(run.offset, len));
                    left -= len;
                }
                ret
            }
            Self::Slack(v) => v.runs().to_vec(),
        }
    }
}

impl<R: Read + Seek> Read for OleStream<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Exact(v) => v.read(buf),
            Self::Slack(v) => v.read(buf),
        }
    }
}

impl<R: Read + Seek> Seek for OleStream<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Exact(v) => v.seek(pos),
            Self::Slack(v) => v.seek(pos),
        }
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        match self {
            Self::Exact(v) => v.stream_position(),
            Self::Slack(v) => v.stream_position(),
        }
    }
}

/// An iterator that walks the Ole directory tree
///
/// # Warning
/// Due to the Ole structure, it is possible to chain entries in convoluted ways
///
/// The iterator is safe from inifinte loops but may not reach all the entries
/// from all the possible paths
pub struct OleEntryIterator<'a, R: Read + Seek> {
    ole: &'a OleCore<R>,
    stack: Vec<(String, u32)>,
    seen: HashSet<u32>,
}

impl<'a, R: Read + Seek> Iterator for OleEntryIterator<'a, R> {
    /// A tuple consisting of:
    /// * A `/` separated path
    /// * An Ole directory Entry
    type Item = (String, &'a OleEntry);

    fn next(&mut self) -> Option<Self::Item> {
        if self.seen.is_empty() {
            if let Some(first_child) = self.ole.entries.first().and_then(|r| r.child()) {
                self.seen.insert(0);
                self.seen.insert(first_child);
                self.stack.push(("".to_string(), first_child));
            }
        }
        while let Some((path, next_id)) = self.stack.pop() {
            let Some(cur) = self.ole.entry(next_id) else {
                continue;
            };
            let child_path = format!("{}{}/", path, cur.name);
            for (next, next_path) in [
                (cur.child(), &child_path),
                (cur.right(), &path),
                (cur.left(), &path),
            ] {
                if let Some(next_id) = next {
                    if self.seen.insert(next_id) {
                        self.stack.push((next_path.to_string(), next_id));
                    }
                }
            }
            return Some((format!("{}{}", path, cur.name), cur));
        }
        None
    }
}
