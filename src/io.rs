//! Diagnostic output sinks.
//!
//! Messages are formatted into a fixed buffer on the stack and handed to
//! `write(2)` in one piece; there is no buffered I/O in this crate.
use crate::{fmt, sys};

pub use crate::fmt::Arg;

/// Fixed formatting buffer size. Longer messages are truncated and
/// followed by a notice.
pub const MSG_MAX_LEN: usize = 128;

const FD_STDOUT: i32 = 1;
const FD_STDERR: i32 = 2;

fn emit(fd: i32, spec: &str, args: &[Arg]) -> usize {
    let mut buf = [0u8; MSG_MAX_LEN];
    let len = fmt::fmt(&mut buf, spec, args);

    if len > MSG_MAX_LEN - 1 {
        sys::write(fd, &buf[..MSG_MAX_LEN - 1]);
        sys::write(fd, b"\nfmt: message truncated\n");
        return MSG_MAX_LEN - 1;
    }

    sys::write(fd, &buf[..len]);
    len
}

/// Format to the standard output stream.
pub fn pfmt(spec: &str, args: &[Arg]) -> usize {
    emit(FD_STDOUT, spec, args)
}

/// Format to the diagnostic stream.
pub fn efmt(spec: &str, args: &[Arg]) -> usize {
    emit(FD_STDERR, spec, args)
}

#[macro_export]
macro_rules! pfmt {
    ($spec:expr) => {
        $crate::io::pfmt($spec, &[])
    };
    ($spec:expr, $($arg:expr),+ $(,)?) => {
        $crate::io::pfmt($spec, &[$($crate::fmt::Arg::from($arg)),+])
    };
}

#[macro_export]
macro_rules! efmt {
    ($spec:expr) => {
        $crate::io::efmt($spec, &[])
    };
    ($spec:expr, $($arg:expr),+ $(,)?) => {
        $crate::io::efmt($spec, &[$($crate::fmt::Arg::from($arg)),+])
    };
}

/// Writer over a fixed stack buffer, used to render the error chain
/// without allocating.
struct FixedWriter {
    buf: [u8; 256],
    len: usize,
}

impl core::fmt::Write for FixedWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for &byte in s.as_bytes() {
            if self.len < self.buf.len() {
                self.buf[self.len] = byte;
                self.len += 1;
            }
        }
        Ok(())
    }
}

/// Print a fatal diagnostic to the standard error stream and terminate
/// the process. Every validation failure in the linker ends here.
pub fn fatal(err: &dyn core::fmt::Display) -> ! {
    use core::fmt::Write as _;

    let mut writer = FixedWriter {
        buf: [0; 256],
        len: 0,
    };
    let _ = writeln!(writer, "dynld: {}", err);
    sys::write(FD_STDERR, &writer.buf[..writer.len]);
    sys::exit(1)
}
