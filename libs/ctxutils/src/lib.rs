//! Shared building blocks for the forensic parsers
//!
//! * [`io`]: fixed width readers and composable byte-source views
//! * [`error`]: classification of parser errors
//! * [`win32`]: Win32 primitive types (requires the `win32` feature)
pub mod error;
pub mod io;
#[cfg(feature = "win32")]
pub mod win32;
