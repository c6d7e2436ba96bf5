//! Console byte-sink and keyboard input queue (spec §4.4 C7, §6).
//!
//! The VGA text-mode console and the PS/2 keyboard driver are both external
//! collaborators (spec §1: "the PS/2 keyboard driver", "the VGA text-mode
//! console"); this module is the narrow contract between them and the rest
//! of the kernel, the same role `kaist-cp-rv6/kernel-rs/src/console.rs`
//! plays for its UART, minus the UART itself. Output goes through
//! [`ConsoleDevice`], a trait the VGA driver implements and registers at
//! boot; input arrives one byte at a time from the keyboard ISR into a
//! fixed-size [`RingBuffer`] (spec §6 "bufsize = 64").

use core::fmt;

use crate::lock::SpinLock;
use crate::param::KEYBOARD_BUF_SIZE;
use crate::sync::RingBuffer;

/// Number of spaces a `\t` expands to. Not fixed by any on-disk format, so
/// this is purely a display convention (spec §6 "interprets `\n`, `\b`, tab").
const TAB_WIDTH: usize = 8;

/// What a console output device must provide: write one raw byte, already
/// past this module's `\n`/`\b`/tab interpretation. Implemented by the VGA
/// text-mode driver.
pub trait ConsoleDevice: Sync {
    fn put_raw(&self, byte: u8);
}

static DEVICE: SpinLock<Option<&'static dyn ConsoleDevice>> = SpinLock::new("console-device", None);

/// Keyboard input queue: the PS/2 driver's ISR posts decoded bytes here with
/// [`keyboard_push`]; `sys_read` on fd 0 drains it with [`console_read`]
/// (spec §6 "bufsize = 64").
static KEYBOARD: RingBuffer<KEYBOARD_BUF_SIZE> = RingBuffer::new("keyboard");

/// Boot-time setup. The VGA driver is discovered and registered separately
/// via [`register_device`] once the boot collaborator has mapped its
/// framebuffer; this function exists so `init_all`'s call order
/// (`original_source/kernel/init.c`: memory, threads, console, then
/// interrupts) has a named hook even before a device is attached.
pub fn consoleinit() {}

/// Registers the VGA console driver. Called once by the boot collaborator
/// after `consoleinit`; `console_write`/`print!` before this point are
/// silently dropped rather than panicking, since a teaching kernel's early
/// boot messages may legitimately predate console setup.
pub fn register_device(device: &'static dyn ConsoleDevice) {
    *DEVICE.lock() = Some(device);
}

/// Writes one logical byte, interpreting `\n` (CRLF), `\b` (erase-in-place),
/// and `\t` (expand to spaces) the way a terminal driver would (spec §6);
/// everything else passes straight through to the device.
pub fn putc(c: u8) {
    let guard = DEVICE.lock();
    let device = match *guard {
        Some(d) => d,
        None => return,
    };
    match c {
        b'\n' => {
            device.put_raw(b'\r');
            device.put_raw(b'\n');
        }
        0x08 => {
            device.put_raw(0x08);
            device.put_raw(b' ');
            device.put_raw(0x08);
        }
        b'\t' => {
            for _ in 0..TAB_WIDTH {
                device.put_raw(b' ');
            }
        }
        _ => device.put_raw(c),
    }
}

/// `sys_write`/`sys_putchar`'s backing call for fd 1/2: writes every byte of
/// `buf` through [`putc`] and returns the count written (always `buf.len()`;
/// the console never reports a short write).
pub fn console_write(buf: &[u8]) -> usize {
    for &b in buf {
        putc(b);
    }
    buf.len()
}

/// `sys_read`'s backing call for fd 0: blocks for at least one byte, filling
/// `buf` up to its length or a trailing `\n`, whichever comes first
/// (line-buffered read, spec §4.9).
pub fn console_read(buf: &mut [u8]) -> usize {
    let mut n = 0;
    while n < buf.len() {
        let byte = KEYBOARD.pop();
        buf[n] = byte;
        n += 1;
        if byte == b'\n' {
            break;
        }
    }
    n
}

/// Called by the PS/2 keyboard ISR (external collaborator) with one
/// already-decoded byte. Non-blocking: drops the byte instead of stalling
/// the ISR if the queue is already full, returning whether it was queued.
pub fn keyboard_push(byte: u8) -> bool {
    KEYBOARD.try_push(byte)
}

/// `fmt::Write` adapter so `core::write!`/the `print!`/`println!` macros
/// (defined in `kernel.rs`) can format straight into the console, matching
/// `kaist-cp-rv6/kernel-rs/src/console.rs`'s `Printer`.
#[derive(Debug, Default)]
pub struct Printer;

impl fmt::Write for Printer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            putc(b);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingDevice(StdMutex<Vec<u8>>);

    impl ConsoleDevice for RecordingDevice {
        fn put_raw(&self, byte: u8) {
            self.0.lock().unwrap().push(byte);
        }
    }

    #[test]
    fn newline_expands_to_crlf() {
        let device: &'static RecordingDevice = Box::leak(Box::new(RecordingDevice(StdMutex::new(Vec::new()))));
        register_device(device);
        console_write(b"hi\n");
        assert_eq!(&*device.0.lock().unwrap(), b"hi\r\n");
    }

    #[test]
    fn backspace_emits_erase_sequence() {
        let device: &'static RecordingDevice = Box::leak(Box::new(RecordingDevice(StdMutex::new(Vec::new()))));
        register_device(device);
        console_write(&[b'a', 0x08]);
        assert_eq!(&*device.0.lock().unwrap(), &[b'a', 0x08, b' ', 0x08]);
    }

    #[test]
    fn keyboard_push_and_read_round_trip() {
        assert!(keyboard_push(b'h'));
        assert!(keyboard_push(b'i'));
        assert!(keyboard_push(b'\n'));
        let mut buf = [0u8; 8];
        let n = console_read(&mut buf);
        assert_eq!(&buf[..n], b"hi\n");
    }
}
