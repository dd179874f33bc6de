//! The kernel's text console: a `print!`/`println!` pair for
//! user-visible output and a separate `kprint!`/`kprintln!` pair for
//! kernel diagnostics, both fanned out to the VGA buffer and the serial
//! port under one lock so the two outputs never interleave with each
//! other. Console *input* — the keyboard driver and the line-discipline
//! buffer — is an external collaborator and isn't modeled.

use core::fmt;

use spin::Mutex;

static CONSOLE_LOCK: Mutex<()> = Mutex::new(());

#[doc(hidden)]
pub fn print(args: fmt::Arguments) {
    let _lock = CONSOLE_LOCK.lock();
    crate::vga_buffer::print(args);
    crate::serial::print(args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*));
    }
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => {
        $crate::print!("{}\n", format_args!($($arg)*));
    }
}

/// Same fan-out as [`print`], kept under a distinct macro name so kernel
/// diagnostics (panic messages, boot progress, scheduler tracing) don't
/// share a macro with whatever a future userland console driver prints
/// on a process's behalf.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*));
    }
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => {
        $crate::kprint!("{}\n", format_args!($($arg)*));
    }
}
