use crate::binary::{BinaryRead, BinaryWrite};
use crate::{AssetGuid, AssetMetadata, AssetType, Ticks};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

#[derive(Debug)]
pub enum HeaderError
{
    IOError(io::Error),
    Truncated,
    InvalidLength(io::Error),
    InvalidGuid
    {
        byte_len: usize,
    },
    InvalidString(io::Error),
}
impl Error for HeaderError { }
impl Display for HeaderError
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Debug::fmt(self, f) }
}
impl From<io::Error> for HeaderError
{
    fn from(err: io::Error) -> Self
    {
        match err.kind()
        {
            io::ErrorKind::UnexpectedEof => Self::Truncated,
            io::ErrorKind::InvalidData => Self::InvalidLength(err),
            _ => Self::IOError(err),
        }
    }
}

// The fixed header at the start of every asset file. Asset payload (if any) follows it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssetHeader
{
    pub asset_type: AssetType,
    pub guid: AssetGuid,
    pub import_date: Ticks,
    pub hash: Option<Box<[u8]>>,
    pub source_path: Option<String>,
    pub icon: Box<[u8]>,
}
impl AssetHeader
{
    pub fn read(reader: &mut impl Read) -> Result<Self, HeaderError>
    {
        Self::read_impl(reader, true)
    }

    // Decode everything but the icon, which is left empty
    pub fn read_without_icon(reader: &mut impl Read) -> Result<Self, HeaderError>
    {
        Self::read_impl(reader, false)
    }

    fn read_impl(reader: &mut impl Read, with_icon: bool) -> Result<Self, HeaderError>
    {
        let asset_type = AssetType::from_i32(reader.read_i32_le()?);

        let guid_len = reader.read_len_i32()?;
        if guid_len != AssetGuid::BYTE_LEN
        {
            return Err(HeaderError::InvalidGuid { byte_len: guid_len });
        }
        let mut guid = [0u8; AssetGuid::BYTE_LEN];
        reader.read_exact(&mut guid)?;

        let import_date = Ticks::from_binary(reader.read_i64_le()?);

        let hash_len = reader.read_len_i32()?;
        let hash = match hash_len
        {
            0 => None,
            len => Some(reader.read_blob(len)?),
        };

        let source_path = reader.read_prefixed_string().map_err(|err| match err.kind()
        {
            io::ErrorKind::InvalidData => HeaderError::InvalidString(err),
            _ => err.into(),
        })?;

        let icon_len = reader.read_len_i32()?;
        let icon = match with_icon
        {
            true => reader.read_blob(icon_len)?,
            false =>
            {
                reader.skip_blob(icon_len)?;
                Box::default()
            }
        };

        Ok(Self
        {
            asset_type,
            guid: AssetGuid(guid),
            import_date,
            hash,
            source_path: (!source_path.is_empty()).then_some(source_path),
            icon,
        })
    }

    // Writes from offset 0, leaving whatever follows the header alone
    pub fn write(&self, writer: &mut (impl Write + Seek)) -> Result<(), HeaderError>
    {
        writer.seek(SeekFrom::Start(0))?;

        writer.write_i32_le(self.asset_type as i32)?;
        writer.write_blob(self.guid.as_bytes())?;
        writer.write_i64_le(self.import_date.to_binary())?;
        writer.write_blob(self.hash.as_deref().unwrap_or_default())?;
        writer.write_prefixed_string(self.source_path.as_deref().unwrap_or_default())?;
        writer.write_blob(&self.icon)?;
        Ok(())
    }

    #[must_use]
    pub fn into_metadata(self, full_path: impl Into<std::path::PathBuf>, register_time: Ticks) -> AssetMetadata
    {
        AssetMetadata
        {
            asset_type: self.asset_type,
            guid: self.guid,
            icon: self.icon,
            full_path: full_path.into(),
            source_path: self.source_path,
            register_time,
            import_date: self.import_date,
            hash: self.hash,
        }
    }
}

// 8 byte content hash for asset payloads
pub fn content_hash(payload: &[u8]) -> Box<[u8]>
{
    const CONTENT_HASH_SEED: u64 = 0x6b69_6c6e; // "kiln"
    let hash = nab_kiln::hashing::hash_bstrings(CONTENT_HASH_SEED, &[payload]);
    Box::new(hash.to_le_bytes())
}

// Create the file if needed and (re)write its header. Existing payload bytes past the header are kept
pub fn write_asset_header(file_path: impl AsRef<Path>, header: &AssetHeader) -> Result<(), HeaderError>
{
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(file_path)?;
    let mut writer = BufWriter::new(file);
    header.write(&mut writer)?;
    writer.flush()?;
    Ok(())
}

// The one function the native tooling boundary has to provide
pub trait AssetHeaderDecoder: Send + Sync
{
    // Fully decode an asset file's header, icon included
    fn decode_asset_header(&self, file_path: &Path) -> Result<AssetMetadata, HeaderError>;

    // Decode what the registry needs. Implementations may leave the icon empty
    fn decode_asset_info(&self, file_path: &Path) -> Result<AssetMetadata, HeaderError>
    {
        self.decode_asset_header(file_path)
    }
}

// Reads headers straight off disk
#[derive(Debug, Default, Clone, Copy)]
pub struct FileHeaderDecoder;
impl FileHeaderDecoder
{
    fn open(file_path: &Path) -> Result<BufReader<File>, HeaderError>
    {
        Ok(BufReader::new(File::open(file_path)?))
    }
}
impl AssetHeaderDecoder for FileHeaderDecoder
{
    fn decode_asset_header(&self, file_path: &Path) -> Result<AssetMetadata, HeaderError>
    {
        let header = AssetHeader::read(&mut Self::open(file_path)?)?;
        Ok(header.into_metadata(file_path, Ticks::now()))
    }

    fn decode_asset_info(&self, file_path: &Path) -> Result<AssetMetadata, HeaderError>
    {
        let header = AssetHeader::read_without_icon(&mut Self::open(file_path)?)?;
        Ok(header.into_metadata(file_path, Ticks::now()))
    }
}
