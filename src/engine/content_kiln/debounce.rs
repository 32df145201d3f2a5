use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};
use std::time::{Duration, Instant};

// Consecutive re-arms before a timer complains that its consumer never makes progress
pub const REPEAT_WARNING_THRESHOLD: usize = 240;

// What a firing timer hands to its callback
#[derive(Debug)]
pub struct DebouncePayload<T>
{
    pub events: Vec<T>, // everything triggered since the last successful firing, in trigger order
    pub repeat: bool, // set to keep the events and restart the countdown instead of clearing
}

struct TimerState<T>
{
    pending: Vec<T>,
    deadline: Option<Instant>,
    disabled: bool, // until the next trigger, a repeating callback doesn't re-arm
    stopping: bool,
}

struct TimerShared<T>
{
    state: Mutex<TimerState<T>>,
    wake: Condvar,
}

/* Coalesces bursts of triggers into a single callback once the window goes quiet.
   Callbacks run on one dedicated thread per timer, so firings never overlap.
   Triggers are accepted from any thread, including while a firing is in flight */
pub struct DebounceTimer<T: Send + 'static>
{
    shared: Arc<TimerShared<T>>,
    delay: Duration,
    thread: Option<JoinHandle<()>>,
}
impl<T: Send + 'static> DebounceTimer<T>
{
    pub fn new<F>(name: &str, delay: Duration, callback: F) -> io::Result<Self>
        where F: FnMut(&mut DebouncePayload<T>) + Send + 'static
    {
        let shared = Arc::new(TimerShared
        {
            state: Mutex::new(TimerState
            {
                pending: Vec::new(),
                deadline: None,
                disabled: false,
                stopping: false,
            }),
            wake: Condvar::new(),
        });

        let thread = Builder::new()
            .name(format!("Debounce timer ({name})"))
            .spawn(Self::timer_fn(shared.clone(), name.to_string(), delay, callback))?;

        Ok(Self
        {
            shared,
            delay,
            thread: Some(thread),
        })
    }

    // Record a payload (if any) and restart the countdown
    pub fn trigger(&self, payload: Option<T>)
    {
        trigger_shared(&self.shared, self.delay, payload);
    }

    // A trigger-only handle that can be moved to other threads. It does not keep the timer alive
    #[must_use]
    pub fn trigger_handle(&self) -> DebounceTrigger<T>
    {
        DebounceTrigger
        {
            shared: self.shared.clone(),
            delay: self.delay,
        }
    }

    /* Cancel the countdown (if any). Pending payloads are kept for the next trigger.
       A callback in flight that asks to repeat keeps its events but is not re-armed */
    pub fn disable(&self)
    {
        let mut state = self.shared.state.lock();
        state.deadline = None;
        state.disabled = true;
        self.shared.wake.notify_one();
    }

    #[must_use]
    pub fn is_armed(&self) -> bool
    {
        self.shared.state.lock().deadline.is_some()
    }

    // Payloads waiting for the next firing (not counting one currently being delivered)
    #[must_use]
    pub fn pending_count(&self) -> usize
    {
        self.shared.state.lock().pending.len()
    }

    fn timer_fn<F>(shared: Arc<TimerShared<T>>, name: String, delay: Duration, mut callback: F) -> impl FnOnce()
        where F: FnMut(&mut DebouncePayload<T>) + Send + 'static
    {
        move ||
        {
            log::trace!("Starting debounce timer thread '{name}'");
            let mut repeat_streak = 0usize;
            let mut state = shared.state.lock();
            'timer: loop
            {
                if state.stopping { break 'timer; }

                let Some(deadline) = state.deadline else
                {
                    shared.wake.wait(&mut state);
                    continue 'timer;
                };

                if Instant::now() < deadline
                {
                    let _ = shared.wake.wait_until(&mut state, deadline);
                    continue 'timer;
                }

                state.deadline = None;
                let mut payload = DebouncePayload
                {
                    events: std::mem::take(&mut state.pending),
                    repeat: false,
                };

                drop(state);
                callback(&mut payload);
                state = shared.state.lock();

                if payload.repeat
                {
                    repeat_streak += 1;
                    if repeat_streak == REPEAT_WARNING_THRESHOLD
                    {
                        log::warn!("Debounce timer '{name}' has re-armed {repeat_streak} times in a row without delivering");
                    }

                    // anything triggered during the callback goes after the retained events
                    payload.events.append(&mut state.pending);
                    state.pending = payload.events;
                    if !state.disabled
                    {
                        state.deadline = Some(Instant::now() + delay);
                    }
                }
                else
                {
                    repeat_streak = 0;
                }
            }
            log::trace!("Stopping debounce timer thread '{name}'");
        }
    }
}

fn trigger_shared<T>(shared: &TimerShared<T>, delay: Duration, payload: Option<T>)
{
    let mut state = shared.state.lock();
    if state.stopping { return; }

    if let Some(p) = payload
    {
        state.pending.push(p);
    }
    state.disabled = false;
    state.deadline = Some(Instant::now() + delay);
    shared.wake.notify_one();
}

pub struct DebounceTrigger<T>
{
    shared: Arc<TimerShared<T>>,
    delay: Duration,
}
impl<T> DebounceTrigger<T>
{
    // Same as DebounceTimer::trigger(). Ignored once the timer has been dropped
    pub fn trigger(&self, payload: Option<T>)
    {
        trigger_shared(&self.shared, self.delay, payload);
    }
}
impl<T> Clone for DebounceTrigger<T>
{
    fn clone(&self) -> Self
    {
        Self { shared: self.shared.clone(), delay: self.delay }
    }
}

impl<T: Send + 'static> Drop for DebounceTimer<T>
{
    // Stops without firing, anything pending is discarded
    fn drop(&mut self)
    {
        {
            let mut state = self.shared.state.lock();
            state.stopping = true;
            self.shared.wake.notify_one();
        }

        if let Some(thread) = self.thread.take()
        {
            if thread.thread().id() == std::thread::current().id()
            {
                return; // dropped from inside its own callback
            }
            if thread.join().is_err()
            {
                log::error!("Debounce timer thread panicked");
            }
        }
    }
}
