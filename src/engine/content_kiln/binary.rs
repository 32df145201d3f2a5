// Little-endian primitives shared by the asset header and the cache file

use nab_kiln::utils::varint;
use std::io;
use std::io::{Read, Write};

// Upper bound on any single length-prefixed blob (icons, hashes, strings)
pub const MAX_BLOB_LEN: usize = 64 * 1024 * 1024;

pub trait BinaryRead: Read
{
    fn read_i32_le(&mut self) -> io::Result<i32>
    {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(i32::from_le_bytes(bytes))
    }

    fn read_i64_le(&mut self) -> io::Result<i64>
    {
        let mut bytes = [0u8; 8];
        self.read_exact(&mut bytes)?;
        Ok(i64::from_le_bytes(bytes))
    }

    // Read a declared length, rejecting negative or absurd values
    fn read_len_i32(&mut self) -> io::Result<usize>
    {
        let len = self.read_i32_le()?;
        checked_len(len as i64)
    }

    // Read exactly `len` bytes without trusting `len` for the allocation up front
    fn read_blob(&mut self, len: usize) -> io::Result<Box<[u8]>>
    {
        let mut buf = Vec::new();
        self.take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len
        {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof,
                format!("expected {len} bytes but only {} remain", buf.len())));
        }
        Ok(buf.into_boxed_slice())
    }

    fn skip_blob(&mut self, len: usize) -> io::Result<()>
    {
        let skipped = io::copy(&mut self.take(len as u64), &mut io::sink())?;
        if skipped != len as u64
        {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof,
                format!("expected {len} bytes but only {skipped} remain")));
        }
        Ok(())
    }

    // 7-bit length prefixed UTF-8
    fn read_prefixed_string(&mut self) -> io::Result<String>
    {
        let len = checked_len(varint::decode_from(self)? as i64)?;
        let bytes = self.read_blob(len)?;
        String::from_utf8(bytes.into_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
impl<R: Read + ?Sized> BinaryRead for R { }

pub trait BinaryWrite: Write
{
    fn write_i32_le(&mut self, value: i32) -> io::Result<()>
    {
        self.write_all(&value.to_le_bytes())
    }

    fn write_i64_le(&mut self, value: i64) -> io::Result<()>
    {
        self.write_all(&value.to_le_bytes())
    }

    fn write_len_i32(&mut self, len: usize) -> io::Result<()>
    {
        let len = i32::try_from(len).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length does not fit in an int32"))?;
        self.write_i32_le(len)
    }

    // int32 length followed by the bytes
    fn write_blob(&mut self, bytes: &[u8]) -> io::Result<()>
    {
        self.write_len_i32(bytes.len())?;
        self.write_all(bytes)
    }

    fn write_prefixed_string(&mut self, value: &str) -> io::Result<()>
    {
        let len = u32::try_from(value.len()).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string is too long"))?;
        varint::encode_into(len, self)?;
        self.write_all(value.as_bytes())
    }
}
impl<W: Write + ?Sized> BinaryWrite for W { }

fn checked_len(len: i64) -> io::Result<usize>
{
    if len < 0
    {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("negative length {len}")));
    }
    if len as u64 > MAX_BLOB_LEN as u64
    {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("length {len} exceeds the {MAX_BLOB_LEN} byte limit")));
    }
    Ok(len as usize)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::io::Cursor;

    #[test]
    fn prefixed_string_layout()
    {
        let mut out = Vec::new();
        out.write_prefixed_string("abc").unwrap();
        assert_eq!(out, [3, b'a', b'b', b'c']);

        let long = "x".repeat(200);
        out.clear();
        out.write_prefixed_string(&long).unwrap();
        assert_eq!(&out[0..2], &[0xc8, 0x01]);
        assert_eq!(out.len(), 202);
        assert_eq!(long, Cursor::new(out).read_prefixed_string().unwrap());
    }

    #[test]
    fn empty_string()
    {
        let mut out = Vec::new();
        out.write_prefixed_string("").unwrap();
        assert_eq!(out, [0]);
        assert_eq!("", Cursor::new(out).read_prefixed_string().unwrap());
    }

    #[test]
    fn blob_truncated()
    {
        let mut input = Cursor::new([1u8, 2, 3]);
        let err = input.read_blob(10).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn negative_length()
    {
        let mut input = Cursor::new((-1i32).to_le_bytes());
        let err = input.read_len_i32().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_length()
    {
        let mut input = Cursor::new(i32::MAX.to_le_bytes());
        let err = input.read_len_i32().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn skip()
    {
        let mut input = Cursor::new([1u8, 2, 3, 4]);
        input.skip_blob(3).unwrap();
        assert_eq!(input.read_blob(1).unwrap().as_ref(), &[4]);
        assert_eq!(input.skip_blob(1).unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn little_endian()
    {
        let mut out = Vec::new();
        out.write_i32_le(0x0102_0304).unwrap();
        out.write_i64_le(-2).unwrap();
        assert_eq!(&out[0..4], &[4, 3, 2, 1]);

        let mut input = Cursor::new(out);
        assert_eq!(0x0102_0304, input.read_i32_le().unwrap());
        assert_eq!(-2, input.read_i64_le().unwrap());
    }
}
