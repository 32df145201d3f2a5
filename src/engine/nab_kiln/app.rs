use std::fmt::Debug;
use std::io::Read;
use std::panic::PanicHookInfo;
use std::process::ExitCode;
use std::sync::atomic::{AtomicI32, Ordering};

pub trait CliArgs: clap::Parser + Debug { }
impl<T: clap::Parser + Debug> CliArgs for T { }

// workspace crates that log at the app's level rather than the global one
const WORKSPACE_CRATES: &[&str] = &["nab_kiln", "content_kiln"];

// First path segment of the type's name
fn owning_crate<T>() -> &'static str
{
    let name = std::any::type_name::<T>();
    name.split("::").next().unwrap_or(name)
}

fn init_logging(app_crate: &str)
{
    #[cfg(debug_assertions)]
    let (global_level, workspace_level) = (log::LevelFilter::Warn, log::LevelFilter::Debug);
    #[cfg(not(debug_assertions))]
    let (global_level, workspace_level) = (log::LevelFilter::Warn, log::LevelFilter::Info);

    let mut builder = colog::basic_builder();
    builder.filter_level(global_level);
    for module in WORKSPACE_CRATES.iter().copied().chain(std::iter::once(app_crate))
    {
        builder.filter_module(module, workspace_level);
    }
    // RUST_LOG wins over the defaults above
    builder.parse_default_env();
    if builder.try_init().is_err()
    {
        log::debug!("Logging was already initialized");
    }
}

// One run of a command line tool: logging, parsed arguments, and how it ended
#[derive(Debug)]
pub struct AppRun<TCliArgs: CliArgs>
{
    pub app_name: &'static str,
    pub version_str: &'static str,

    pub start_time: chrono::DateTime<chrono::Local>,
    pub args: TCliArgs,
    pub pid: u32,
    pub is_elevated: bool,

    exit_reason: AtomicI32,
}
impl<TCliArgs: CliArgs> AppRun<TCliArgs>
{
    // Initialize logging and parse the command line. Exits the process on bad arguments
    pub fn startup(app_name: &'static str, app_version: &'static str) -> Self
    {
        let app_crate = owning_crate::<TCliArgs>();
        init_logging(app_crate);

        let app_run = Self
        {
            app_name,
            version_str: app_version,
            start_time: chrono::Local::now(),
            args: TCliArgs::parse(),
            pid: std::process::id(),
            is_elevated: is_root::is_root(),
            exit_reason: AtomicI32::new(ExitReason::NormalExit as i32),
        };

        log::info!(target: app_crate,
            "=== {} v{} (PID {}{}) started at {} ===",
            app_run.app_name,
            app_run.version_str,
            app_run.pid,
            if app_run.is_elevated { ", elevated" } else { "" },
            app_run.start_time.format("%Y-%m-%d %H:%M:%S"));
        log::debug!(target: app_crate, "{:?}", app_run.args);

        app_run
    }

    pub fn set_exit_reason(&self, exit_reason: ExitReason)
    {
        self.exit_reason.store(exit_reason as i32, Ordering::SeqCst);
    }
    #[must_use]
    pub fn get_exit_reason(&self) -> ExitReason
    {
        ExitReason::from_i32(self.exit_reason.load(Ordering::SeqCst))
    }
}
impl<TCliArgs: CliArgs> Drop for AppRun<TCliArgs>
{
    fn drop(&mut self)
    {
        let ran_for = chrono::Local::now() - self.start_time;
        log::info!(target: "app",
            "{} (PID {}) exiting after {}.{:03}s: {:?}",
            self.app_name,
            self.pid,
            ran_for.num_seconds(),
            ran_for.num_milliseconds() % 1000,
            self.get_exit_reason());
    }
}

// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitReason
{
    Unset = !1, // never stored
    NormalExit = 0,
    BadArguments = 2,
    Failed = 3,
    Panic = -99,
}
impl ExitReason
{
    #[must_use]
    pub const fn from_i32(value: i32) -> Self
    {
        match value
        {
            0 => Self::NormalExit,
            2 => Self::BadArguments,
            3 => Self::Failed,
            -99 => Self::Panic,
            _ => Self::Unset,
        }
    }
}
impl std::process::Termination for ExitReason
{
    fn report(self) -> ExitCode
    {
        (self as u8).into()
    }
}

fn panic_message(info: &PanicHookInfo<'_>) -> String
{
    let payload = info.payload();
    let message = payload.downcast_ref::<&str>().copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("(non-string payload)");
    match info.location()
    {
        Some(location) => format!("{message} at {location}"),
        None => message.to_string(),
    }
}

// Log panics and exit with ExitReason::Panic. Optionally waits for input first, for console windows that close on exit
pub fn set_panic_hook(wait_for_exit: bool)
{
    let default_panic_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info|
    {
        default_panic_hook(info);
        log::error!("Panicked: {}", panic_message(info));

        if wait_for_exit
        {
            eprint!("Press enter to exit... ");
            let mut input = [0u8];
            let _ = std::io::stdin().read(&mut input);
        }

        fatal_error(ExitReason::Panic)
    }));
}

// Exit immediately, skipping destructors
pub fn fatal_error(reason: ExitReason) -> !
{
    eprintln!("!!! FATAL: exiting (PID {}) at {} with reason {:?}",
        std::process::id(),
        chrono::Local::now(),
        reason);
    std::process::exit(reason as i32)
}
