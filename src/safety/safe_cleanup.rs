//! Symlink-safe recursive removal.
//!
//! Walks the tree through directory file descriptors (`openat`/`fstatat`/`unlinkat`)
//! so that a symlink planted inside a workspace can never redirect deletion outside it.

use crate::config::types::{Result, SandboxError};
use std::ffi::{CStr, CString};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

const DIR_FLAGS: libc::c_int =
    libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC | libc::O_NOFOLLOW;

struct DirFd(RawFd);

impl Drop for DirFd {
    fn drop(&mut self) {
        if self.0 >= 0 {
            unsafe {
                libc::close(self.0);
            }
        }
    }
}

fn os_error(what: &str) -> SandboxError {
    SandboxError::Workspace(format!("{what}: {}", std::io::Error::last_os_error()))
}

fn to_cstring(bytes: &[u8], path: &Path) -> Result<CString> {
    CString::new(bytes).map_err(|_| {
        SandboxError::Workspace(format!("path contains NUL byte: {}", path.display()))
    })
}

fn open_dir_at(parent: Option<RawFd>, name: &CStr) -> Result<DirFd> {
    let fd = unsafe {
        match parent {
            Some(parent) => libc::openat(parent, name.as_ptr(), DIR_FLAGS),
            None => libc::open(name.as_ptr(), DIR_FLAGS),
        }
    };
    if fd < 0 {
        return Err(os_error(&format!("open directory {:?}", name)));
    }
    Ok(DirFd(fd))
}

fn lstat_at(parent: RawFd, name: &CStr) -> Result<libc::stat> {
    let mut st = std::mem::MaybeUninit::<libc::stat>::zeroed();
    let rc = unsafe {
        libc::fstatat(parent, name.as_ptr(), st.as_mut_ptr(), libc::AT_SYMLINK_NOFOLLOW)
    };
    if rc != 0 {
        return Err(os_error(&format!("fstatat {:?}", name)));
    }
    Ok(unsafe { st.assume_init() })
}

fn unlink_at(parent: RawFd, name: &CStr, flags: libc::c_int) -> Result<()> {
    if unsafe { libc::unlinkat(parent, name.as_ptr(), flags) } != 0 {
        return Err(os_error(&format!("unlinkat {:?}", name)));
    }
    Ok(())
}

/// Names of the entries in `dir`, excluding `.` and `..`.
fn list_entries(dir: &DirFd) -> Result<Vec<CString>> {
    let iter_fd = unsafe { libc::dup(dir.0) };
    if iter_fd < 0 {
        return Err(os_error("dup"));
    }
    let stream = unsafe { libc::fdopendir(iter_fd) };
    if stream.is_null() {
        unsafe {
            libc::close(iter_fd);
        }
        return Err(os_error("fdopendir"));
    }

    let mut names = Vec::new();
    let outcome = loop {
        unsafe {
            *libc::__errno_location() = 0;
        }
        let entry = unsafe { libc::readdir(stream) };
        if entry.is_null() {
            let errno = unsafe { *libc::__errno_location() };
            break if errno == 0 {
                Ok(())
            } else {
                Err(SandboxError::Workspace(format!(
                    "readdir: {}",
                    std::io::Error::from_raw_os_error(errno)
                )))
            };
        }
        let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) };
        if name.to_bytes() != b"." && name.to_bytes() != b".." {
            names.push(name.to_owned());
        }
    };
    unsafe {
        libc::closedir(stream);
    }
    outcome.map(|_| names)
}

fn empty_dir(dir: &DirFd, root_dev: libc::dev_t) -> Result<()> {
    for name in list_entries(dir)? {
        let st = lstat_at(dir.0, &name)?;
        if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
            if st.st_dev != root_dev {
                return Err(SandboxError::Workspace(format!(
                    "refusing to cross filesystem boundary at {:?}",
                    name
                )));
            }
            let child = open_dir_at(Some(dir.0), &name)?;
            empty_dir(&child, root_dev)?;
            unlink_at(dir.0, &name, libc::AT_REMOVEDIR)?;
        } else {
            unlink_at(dir.0, &name, 0)?;
        }
    }
    Ok(())
}

/// Remove `path` and everything below it without following symlinks.
/// A missing path is not an error.
pub fn remove_tree_secure(path: &Path) -> Result<()> {
    if std::fs::symlink_metadata(path).is_err() {
        return Ok(());
    }

    let parent = path.parent().ok_or_else(|| {
        SandboxError::Workspace(format!("cannot remove path without parent: {}", path.display()))
    })?;
    let name = path.file_name().ok_or_else(|| {
        SandboxError::Workspace(format!("cannot remove path without name: {}", path.display()))
    })?;

    let parent_c = to_cstring(parent.as_os_str().as_bytes(), path)?;
    let name_c = to_cstring(name.as_bytes(), path)?;

    let parent_fd = open_dir_at(None, &parent_c)?;
    let st = lstat_at(parent_fd.0, &name_c)?;

    if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
        let dir = open_dir_at(Some(parent_fd.0), &name_c)?;
        empty_dir(&dir, st.st_dev)?;
        drop(dir);
        unlink_at(parent_fd.0, &name_c, libc::AT_REMOVEDIR)
    } else {
        unlink_at(parent_fd.0, &name_c, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_nested_tree() {
        let scratch = tempfile::tempdir().unwrap();
        let root = scratch.path().join("tree");
        std::fs::create_dir_all(root.join("a/b/c")).unwrap();
        std::fs::write(root.join("a/file.txt"), b"x").unwrap();
        std::fs::write(root.join("a/b/c/deep.bin"), [0u8, 1, 2]).unwrap();

        remove_tree_secure(&root).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn does_not_follow_symlinks() {
        let scratch = tempfile::tempdir().unwrap();
        let outside = scratch.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        std::fs::write(outside.join("keep.txt"), b"keep").unwrap();

        let root = scratch.path().join("tree");
        std::fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        remove_tree_secure(&root).unwrap();
        assert!(!root.exists());
        assert!(outside.join("keep.txt").exists());
    }

    #[test]
    fn missing_path_is_ok() {
        let scratch = tempfile::tempdir().unwrap();
        assert!(remove_tree_secure(&scratch.path().join("nope")).is_ok());
    }

    #[test]
    fn removes_plain_file() {
        let scratch = tempfile::tempdir().unwrap();
        let file = scratch.path().join("script.py");
        std::fs::write(&file, b"print(1)").unwrap();
        remove_tree_secure(&file).unwrap();
        assert!(!file.exists());
    }
}
