use std::fmt::{Debug, Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;
use chrono::{DateTime, Utc};
use rand::Rng;

// All the asset types the engine tooling can produce
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(i32)]
pub enum AssetType
{
    #[default]
    Unknown = 0,
    Animation = 1,
    Audio = 2,
    Material = 3,
    Mesh = 4,
    Skeleton = 5,
    Texture = 6,
}
impl AssetType
{
    // Values written by newer tooling decode as Unknown rather than failing
    #[must_use]
    pub const fn from_i32(value: i32) -> Self
    {
        match value
        {
            1 => Self::Animation,
            2 => Self::Audio,
            3 => Self::Material,
            4 => Self::Mesh,
            5 => Self::Skeleton,
            6 => Self::Texture,
            _ => Self::Unknown,
        }
    }
}

// 128-bit asset identifier, stored in the byte order of .NET's Guid.ToByteArray()
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssetGuid(pub [u8; 16]);
impl AssetGuid
{
    pub const BYTE_LEN: usize = 16;

    // Random (version 4) guid
    #[must_use]
    pub fn generate() -> Self
    {
        let mut bytes = [0u8; 16];
        rand::rng().fill(&mut bytes[..]);
        bytes[7] = (bytes[7] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Self(bytes)
    }

    #[inline] #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] { &self.0 }
}
impl Display for AssetGuid
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result
    {
        let b = &self.0;
        write!(f, "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-",
            b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9])?;
        for byte in &b[10..16]
        {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
impl Debug for AssetGuid
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Display::fmt(self, f) }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseGuidError;
impl std::error::Error for ParseGuidError { }
impl Display for ParseGuidError
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str("invalid guid") }
}

impl FromStr for AssetGuid
{
    type Err = ParseGuidError;

    // accepts the hyphenated form, optionally wrapped in braces
    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
        let hex: String = trimmed.chars().filter(|c| *c != '-').collect();
        if !hex.is_ascii() || hex.len() != 32 || trimmed.len() != 36 { return Err(ParseGuidError); }

        let mut text_order = [0u8; 16];
        for (i, byte) in text_order.iter_mut().enumerate()
        {
            *byte = u8::from_str_radix(&hex[(i * 2)..(i * 2 + 2)], 16).map_err(|_| ParseGuidError)?;
        }

        // undo the little-endian first three groups
        let t = text_order;
        Ok(Self([
            t[3], t[2], t[1], t[0],
            t[5], t[4],
            t[7], t[6],
            t[8], t[9], t[10], t[11], t[12], t[13], t[14], t[15],
        ]))
    }
}

// 100ns intervals since 0001-01-01T00:00:00 UTC
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticks(pub i64);
impl Ticks
{
    pub const PER_SECOND: i64 = 10_000_000;
    pub const UNIX_EPOCH: Self = Self(621_355_968_000_000_000);
    pub const MAX: Self = Self(3_155_378_975_999_999_999); // 9999-12-31T23:59:59.9999999

    // DateTime.ToBinary() packs the kind into the top two bits
    const KIND_UTC: u64 = 0x4000_0000_0000_0000;
    const KIND_LOCAL: u64 = 0x8000_0000_0000_0000;
    const TICKS_MASK: u64 = 0x3fff_ffff_ffff_ffff;
    const TICKS_CEILING: i64 = 0x4000_0000_0000_0000;

    #[must_use]
    pub fn now() -> Self { Self::from_datetime(Utc::now()) }

    #[must_use]
    pub fn from_datetime(time: DateTime<Utc>) -> Self
    {
        let secs = time.timestamp();
        let sub_ticks = (time.timestamp_subsec_nanos() / 100) as i64;
        Self(Self::UNIX_EPOCH.0 + secs * Self::PER_SECOND + sub_ticks)
    }

    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self
    {
        Self::from_datetime(DateTime::<Utc>::from(time))
    }

    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>>
    {
        let rel = self.0 - Self::UNIX_EPOCH.0;
        let secs = rel.div_euclid(Self::PER_SECOND);
        let nanos = (rel.rem_euclid(Self::PER_SECOND) * 100) as u32;
        DateTime::<Utc>::from_timestamp(secs, nanos)
    }

    // Always written as a UTC-kind value
    #[must_use]
    pub const fn to_binary(self) -> i64
    {
        ((self.0 as u64 & Self::TICKS_MASK) | Self::KIND_UTC) as i64
    }

    #[must_use]
    pub const fn from_binary(value: i64) -> Self
    {
        let raw = value as u64;
        let mut ticks = (raw & Self::TICKS_MASK) as i64;
        if raw & Self::KIND_LOCAL != 0
        {
            // local-kind values hold UTC ticks, wrapped into the positive range when the offset underflowed
            if ticks > Self::TICKS_CEILING - Self::MAX.0
            {
                ticks -= Self::TICKS_CEILING;
            }
            if ticks < 0 { ticks = 0; }
        }
        if ticks > Self::MAX.0 { ticks = Self::MAX.0; }
        Self(ticks)
    }

    // The next representable instant after this one
    #[inline] #[must_use]
    pub const fn successor(self) -> Self { Self(self.0 + 1) }
}
impl Display for Ticks
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result
    {
        match self.to_datetime()
        {
            Some(dt) => Display::fmt(&dt.format("%Y-%m-%d %H:%M:%S%.3f UTC"), f),
            None => write!(f, "{} ticks", self.0),
        }
    }
}
impl Debug for Ticks
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Display::fmt(self, f) }
}

// Everything the registry knows about a single asset file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMetadata
{
    pub asset_type: AssetType,
    pub guid: AssetGuid,
    pub icon: Box<[u8]>,
    pub full_path: PathBuf,
    pub source_path: Option<String>, // file the asset was imported from
    pub register_time: Ticks, // last time the registry (re)computed this entry
    pub import_date: Ticks,
    pub hash: Option<Box<[u8]>>,
}
