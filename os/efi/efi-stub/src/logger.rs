use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Prefix of every line the stub prints.
pub const PREFIX: &str = "EFI stub: ";

/// Somewhere to print to while firmware still owns the console.
pub trait Console: Send + Sync {
    fn write_fmt(&self, args: fmt::Arguments<'_>);
}

/// `log` backend of the stub.
///
/// Records go to the firmware console until [`exit_boot_services`](Self::exit_boot_services)
/// is called; after that they are dropped, as the console protocol is gone.
pub struct StubLogger<C> {
    max_level: LevelFilter,
    boot_services_available: AtomicBool,
    console: C,
}

impl<C: Console> StubLogger<C> {
    #[must_use]
    pub const fn new(max_level: LevelFilter, console: C) -> Self {
        Self {
            max_level,
            boot_services_available: AtomicBool::new(true),
            console,
        }
    }

    /// Install as the global logger. Call once during early init.
    ///
    /// # Errors
    /// If another logger was installed already.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }

    pub fn exit_boot_services(&self) {
        self.boot_services_available.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_mirroring(&self) -> bool {
        self.boot_services_available.load(Ordering::Acquire)
    }
}

impl<C: Console> Log for StubLogger<C> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) || !self.is_mirroring() {
            return;
        }
        self.console.write_fmt(format_args!(
            "{PREFIX}[{}] {}\n",
            record.level(),
            record.args()
        ));
    }

    fn flush(&self) {}
}
