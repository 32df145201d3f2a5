use std::fmt::{Debug, Formatter};
use std::time::{Duration, Instant};

// Wall-clock time since creation
#[derive(Copy, Clone, PartialEq)]
pub struct Stopwatch
{
    started: Instant,
}
impl Stopwatch
{
    #[must_use]
    pub fn start_new() -> Self
    {
        Self { started: Instant::now() }
    }

    #[inline] #[must_use]
    pub fn elapsed(&self) -> Duration { self.started.elapsed() }
}
impl Debug for Stopwatch
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Stopwatch")
            .field("Elapsed time", &self.elapsed().as_secs_f64())
            .finish()
    }
}
