// 7-bit groups, least significant first, high bit set on every byte but the last
// (the length prefix .NET's BinaryWriter puts in front of strings)

use std::io;

pub const MAX_BYTES_U32: usize = 5;

pub const fn encode(n: u32) -> (u8, [u8; MAX_BYTES_U32])
{
    let mut out = [0u8; MAX_BYTES_U32];
    let mut rem = n;
    let mut len = 0;
    while rem >= 0x80
    {
        out[len] = (rem as u8) | 0x80;
        rem >>= 7;
        len += 1;
    }
    out[len] = rem as u8;
    (len as u8 + 1, out)
}

pub fn encode_into<W: io::Write + ?Sized>(n: u32, writer: &mut W) -> io::Result<usize> // returns number of bytes written
{
    let encoded = encode(n);
    writer.write_all(&encoded.1[0..encoded.0 as usize])?;
    Ok(encoded.0 as usize)
}

pub fn decode_from<R: io::Read + ?Sized>(reader: &mut R) -> io::Result<u32>
{
    let mut n = 0u32;
    for i in 0..MAX_BYTES_U32
    {
        let mut byte = [0u8];
        reader.read_exact(&mut byte)?;

        let group = (byte[0] & 0x7f) as u32;
        if i == MAX_BYTES_U32 - 1 && (byte[0] & 0xf0) != 0
        {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "7-bit encoded integer overflows 32 bits"));
        }
        n |= group << (7 * i);

        if byte[0] & 0x80 == 0
        {
            return Ok(n);
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "7-bit encoded integer is too long"))
}
