use crate::error::{PipeError, Result};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::pty::{openpty, Winsize};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, Winsize);
nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, Winsize);

/// A freshly allocated PTY pair. The master stays with the manager, the slave
/// is handed to the child as its controlling terminal.
pub struct Pty {
    master: File,
    slave: OwnedFd,
}

impl Pty {
    /// Allocate a new PTY pair (master and slave), optionally sized as
    /// `(rows, cols)`
    pub fn open(size: Option<(u16, u16)>) -> Result<Self> {
        let winsize = size.map(|(rows, cols)| make_winsize(rows, cols));

        let pair =
            openpty(winsize.as_ref(), None).map_err(|e| PipeError::transport("open PTY", e))?;

        // Neither end may leak into the child beyond its stdio.
        set_cloexec(&pair.master).map_err(|e| PipeError::transport("configure PTY master", e))?;
        set_cloexec(&pair.slave).map_err(|e| PipeError::transport("configure PTY slave", e))?;

        Ok(Self {
            master: File::from(pair.master),
            slave: pair.slave,
        })
    }

    pub fn into_parts(self) -> (File, OwnedFd) {
        (self.master, self.slave)
    }
}

pub(crate) fn make_winsize(rows: u16, cols: u16) -> Winsize {
    Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

pub(crate) fn set_cloexec(fd: &impl AsRawFd) -> nix::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map(drop)
}

/// Set the window size of the terminal behind `fd`
pub fn set_winsize(fd: &impl AsRawFd, rows: u16, cols: u16) -> io::Result<()> {
    let winsize = make_winsize(rows, cols);
    unsafe { tiocswinsz(fd.as_raw_fd(), &winsize as *const Winsize) }?;
    Ok(())
}

/// Read the window size of the terminal behind `fd` as `(rows, cols)`
pub fn get_winsize(fd: &impl AsRawFd) -> io::Result<(u16, u16)> {
    let mut winsize = make_winsize(0, 0);
    unsafe { tiocgwinsz(fd.as_raw_fd(), &mut winsize as *mut Winsize) }?;
    Ok((winsize.ws_row, winsize.ws_col))
}

/// Get the current window size of the controlling terminal, if there is one
pub fn get_terminal_winsize() -> Option<(u16, u16)> {
    use std::fs::OpenOptions;

    let tty = OpenOptions::new()
        .read(true)
        .write(false)
        .open("/dev/tty")
        .ok()?;

    get_winsize(&tty).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pty_creation() {
        let (master, _slave) = Pty::open(None).unwrap().into_parts();
        assert!(master.as_raw_fd() > 0);

        let flags = fcntl(master.as_raw_fd(), FcntlArg::F_GETFD).unwrap();
        assert!(FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC));
    }

    #[test]
    fn test_initial_and_updated_winsize() {
        let (master, _slave) = Pty::open(Some((24, 80))).unwrap().into_parts();
        assert_eq!(get_winsize(&master).unwrap(), (24, 80));

        set_winsize(&master, 40, 120).unwrap();
        assert_eq!(get_winsize(&master).unwrap(), (40, 120));
    }

    #[test]
    fn test_winsize_on_regular_file_fails() {
        let file = File::open("/dev/null").unwrap();
        assert!(set_winsize(&file, 24, 80).is_err());
    }
}
