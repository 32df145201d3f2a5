use std::fmt::{Display, Formatter};

pub mod varint;

// Byte count printed with binary (1024-based) units, one decimal unless a precision is given
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(pub u64);
impl ByteSize
{
    const UNITS: [&'static str; 4] = ["KiB", "MiB", "GiB", "TiB"];
}
impl From<usize> for ByteSize
{
    fn from(bytes: usize) -> Self { Self(bytes as u64) }
}
impl Display for ByteSize
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result
    {
        if self.0 < 1024
        {
            return write!(f, "{} B", self.0);
        }

        let mut scaled = self.0 as f64 / 1024.0;
        let mut unit = 0;
        while scaled >= 1024.0 && unit + 1 < Self::UNITS.len()
        {
            scaled /= 1024.0;
            unit += 1;
        }
        let precision = f.precision().unwrap_or(1);
        write!(f, "{scaled:.precision$} {}", Self::UNITS[unit])
    }
}
