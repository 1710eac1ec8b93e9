//! Raw-mode serial transport over a tty device.

use std::ffi::CString;
use std::io;
use std::os::raw::c_int;

use crate::{RadioIoError, RadioPort};

/// Serial device opened in raw 8N1 mode at a fixed baud rate.
pub struct TtyPort {
    fd: c_int,
}

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    Some(match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        460_800 => libc::B460800,
        _ => return None,
    })
}

impl TtyPort {
    pub fn open(device: &str, baud: u32) -> Result<Self, RadioIoError> {
        let speed = baud_constant(baud).ok_or(RadioIoError::BadBaud(baud))?;
        let path = CString::new(device)
            .map_err(|_| RadioIoError::Open(device.into(), io::ErrorKind::InvalidInput.into()))?;
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_NOCTTY | libc::O_SYNC) };
        if fd < 0 {
            return Err(RadioIoError::Open(device.into(), io::Error::last_os_error()));
        }

        let mut tio: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
            let e = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(RadioIoError::Open(device.into(), e));
        }
        unsafe {
            libc::cfmakeraw(&mut tio);
            libc::cfsetispeed(&mut tio, speed);
            libc::cfsetospeed(&mut tio, speed);
        }
        // 8N1, reads block until at least one byte arrives
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cc[libc::VMIN] = 1;
        tio.c_cc[libc::VTIME] = 0;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
            let e = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(RadioIoError::Open(device.into(), e));
        }
        Ok(Self { fd })
    }

    /// Wait up to `timeout_ms` for readable data.
    pub fn poll_readable(&mut self, timeout_ms: i32) -> Result<bool, RadioIoError> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let n = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if n < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(RadioIoError::Io(e));
        }
        Ok(n > 0 && pfd.revents & libc::POLLIN != 0)
    }
}

impl RadioPort for TtyPort {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), RadioIoError> {
        let mut written = 0;
        while written < buf.len() {
            let n = unsafe {
                libc::write(
                    self.fd,
                    buf[written..].as_ptr().cast::<libc::c_void>(),
                    buf.len() - written,
                )
            };
            if n < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(RadioIoError::Io(e));
            }
            written += n as usize;
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), RadioIoError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = unsafe {
                libc::read(
                    self.fd,
                    buf[filled..].as_mut_ptr().cast::<libc::c_void>(),
                    buf.len() - filled,
                )
            };
            if n < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(RadioIoError::Io(e));
            }
            if n == 0 {
                return Err(RadioIoError::Io(io::ErrorKind::UnexpectedEof.into()));
            }
            filled += n as usize;
        }
        Ok(())
    }

    fn flush_input(&mut self) -> Result<(), RadioIoError> {
        if unsafe { libc::tcflush(self.fd, libc::TCIFLUSH) } != 0 {
            return Err(RadioIoError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for TtyPort {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
