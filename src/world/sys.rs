//! Thin wrappers over the Linux syscalls the testbed needs

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Check whether a process is still alive
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Ask a process to terminate
pub fn terminate(pid: u32) -> io::Result<()> {
    check(unsafe { libc::kill(pid as i32, libc::SIGTERM) })
}

/// Move this process into a private mount namespace
///
/// Mounts made afterwards are invisible to the rest of the system and vanish
/// with the process.
pub fn isolate_mounts() -> io::Result<()> {
    check(unsafe { libc::unshare(libc::CLONE_NEWNS) })?;
    let root = c_path(Path::new("/"))?;
    check(unsafe {
        libc::mount(
            std::ptr::null(),
            root.as_ptr(),
            std::ptr::null(),
            libc::MS_REC | libc::MS_PRIVATE,
            std::ptr::null(),
        )
    })
}

pub fn mount_tmpfs(target: &Path) -> io::Result<()> {
    let source = CString::new("tmpfs").map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let target = c_path(target)?;
    check(unsafe {
        libc::mount(
            source.as_ptr(),
            target.as_ptr(),
            source.as_ptr(),
            0,
            std::ptr::null(),
        )
    })
}

pub fn unmount(target: &Path) -> io::Result<()> {
    let target = c_path(target)?;
    check(unsafe { libc::umount2(target.as_ptr(), libc::MNT_DETACH) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_path_with_nul_is_rejected() {
        let path = Path::new("/tmp/a\0b");
        assert_eq!(c_path(path).unwrap_err().kind(), io::ErrorKind::InvalidInput);
    }
}
