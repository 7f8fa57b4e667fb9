use super::Channel;
use crate::Error;
use humansize::{BINARY, format_size};
use nix::sys::stat::Mode;
use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileTypeExt,
    path::Path,
};
use tracing::{debug, info};

/// Channel capacity used where the platform cannot report a maximum.
pub const DEFAULT_CAPACITY: usize = 0x8000;

#[cfg(any(target_os = "linux", target_os = "android"))]
const PIPE_MAX_SIZE: &str = "/proc/sys/fs/pipe-max-size";

/// Largest pipe buffer the platform lets an unprivileged process request.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn negotiate_capacity() -> Result<usize, Error> {
    let raw = std::fs::read_to_string(PIPE_MAX_SIZE).map_err(|source| Error::CapacityQuery {
        path: PIPE_MAX_SIZE.into(),
        source,
    })?;
    let capacity = raw
        .trim()
        .parse()
        .map_err(|_| Error::CapacityParse(raw.trim().to_owned()))?;
    debug!(capacity = %format_size(capacity, BINARY), "platform pipe limit");
    Ok(capacity)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn negotiate_capacity() -> Result<usize, Error> {
    Ok(DEFAULT_CAPACITY)
}

/// Create a FIFO readable and writable by the current user.
pub fn create_fifo(path: &Path) -> Result<(), Error> {
    nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|source| {
        Error::CreateFifo {
            path: path.to_owned(),
            source,
        }
    })
}

/// Open the configured channel for writing.
///
/// Blocks until a reader attaches when the path is a FIFO. Pipes are then
/// grown to the negotiated capacity; regular files are written as-is.
pub fn open(config: &config::Channel) -> Result<Channel<File>, Error> {
    let path = config.path.as_path();
    if config.create && !path.exists() {
        create_fifo(path)?;
        debug!(path = %path.display(), "created fifo");
    }

    let capacity = config.clamp(negotiate_capacity()?);
    debug!(path = %path.display(), "waiting for reader");
    let file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|source| Error::Open {
            path: path.to_owned(),
            source,
        })?;

    let is_fifo = file
        .metadata()
        .map_err(|source| Error::Open {
            path: path.to_owned(),
            source,
        })?
        .file_type()
        .is_fifo();
    let capacity = if is_fifo {
        resize(&file, capacity)?
    } else {
        capacity
    };

    info!(
        path = %path.display(),
        capacity = %format_size(capacity, BINARY),
        is_fifo,
        "channel open"
    );
    Ok(Channel::new(file, capacity))
}

/// Returns the size the kernel actually granted.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn resize(file: &File, size: usize) -> Result<usize, Error> {
    use nix::fcntl::{FcntlArg, fcntl};

    let requested = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
    let granted = fcntl(file, FcntlArg::F_SETPIPE_SZ(requested))
        .map_err(|source| Error::Resize { size, source })?;
    Ok(usize::try_from(granted).unwrap_or(size))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn resize(_file: &File, size: usize) -> Result<usize, Error> {
    Ok(size)
}
