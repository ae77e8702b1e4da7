//! Named-pipe endpoints for the translation channel.
//!
//! The orchestrator binds the listener; injected modules connect as clients.
//! Both sides use message-type pipes so one frame arrives as one message.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};
use windows::core::HSTRING;
use windows::Win32::Foundation::{
    CloseHandle, ERROR_BROKEN_PIPE, ERROR_MORE_DATA, ERROR_PIPE_BUSY, ERROR_PIPE_CONNECTED,
    ERROR_PIPE_NOT_CONNECTED, GENERIC_READ, GENERIC_WRITE, HANDLE,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_NONE, OPEN_EXISTING,
};
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, SetNamedPipeHandleState, WaitNamedPipeW,
    PIPE_ACCESS_DUPLEX, PIPE_READMODE_MESSAGE, PIPE_TYPE_MESSAGE, PIPE_UNLIMITED_INSTANCES,
    PIPE_WAIT,
};

use crate::error::{Error, Result};

/// Connection attempts before giving up.
const CONNECT_ATTEMPTS: u32 = 5;

/// How long to wait on a busy pipe instance, per attempt.
const BUSY_WAIT_MS: u32 = 2000;

const PIPE_BUFFER_SIZE: u32 = 64 * 1024;

struct PipeHandle(HANDLE);

// The handle is only ever used through ReadFile/WriteFile, which are safe to
// issue from different threads on a duplex pipe.
unsafe impl Send for PipeHandle {}
unsafe impl Sync for PipeHandle {}

impl Drop for PipeHandle {
    fn drop(&mut self) {
        // SAFETY: the handle was returned open by CreateFileW/CreateNamedPipeW
        // and is closed exactly once here.
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// One half of a connected pipe. Cloning shares the underlying handle, so a
/// connection splits into a read half and a write half for the transport.
#[derive(Clone)]
pub struct PipeStream {
    handle: Arc<PipeHandle>,
}

impl PipeStream {
    fn pair(handle: HANDLE) -> (PipeStream, PipeStream) {
        let shared = Arc::new(PipeHandle(handle));
        (
            PipeStream {
                handle: Arc::clone(&shared),
            },
            PipeStream { handle: shared },
        )
    }
}

impl Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut read = 0u32;
        // SAFETY: buf outlives the call and read receives the transfer count.
        let outcome = unsafe { ReadFile(self.handle.0, Some(buf), Some(&mut read), None) };
        match outcome {
            Ok(()) => Ok(read as usize),
            // A message larger than buf: take what fits, the rest follows.
            Err(e) if e.code() == ERROR_MORE_DATA.to_hresult() => Ok(read as usize),
            Err(e)
                if e.code() == ERROR_BROKEN_PIPE.to_hresult()
                    || e.code() == ERROR_PIPE_NOT_CONNECTED.to_hresult() =>
            {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, e))
            }
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

impl Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0u32;
        // SAFETY: buf outlives the call and written receives the count.
        let outcome = unsafe { WriteFile(self.handle.0, Some(buf), Some(&mut written), None) };
        match outcome {
            Ok(()) => Ok(written as usize),
            Err(e) if e.code() == ERROR_BROKEN_PIPE.to_hresult() => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, e))
            }
            Err(e) => Err(io::Error::other(e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Connect to the orchestrator's channel as a client.
///
/// Up to five attempts; a busy instance is waited on for two seconds per
/// attempt. On success the handle is switched to message-boundary reads.
pub fn connect(name: &str) -> Result<(PipeStream, PipeStream)> {
    let wide = HSTRING::from(name);
    let mut handle: Option<HANDLE> = None;

    for attempt in 0..CONNECT_ATTEMPTS {
        // SAFETY: wide is a valid nul-terminated pipe name for the call.
        let opened = unsafe {
            CreateFileW(
                &wide,
                GENERIC_READ.0 | GENERIC_WRITE.0,
                FILE_SHARE_NONE,
                None,
                OPEN_EXISTING,
                FILE_FLAGS_AND_ATTRIBUTES(0),
                None,
            )
        };

        match opened {
            Ok(h) => {
                handle = Some(h);
                break;
            }
            Err(e) if e.code() == ERROR_PIPE_BUSY.to_hresult() => {
                // SAFETY: same valid pipe name.
                if unsafe { WaitNamedPipeW(&wide, BUSY_WAIT_MS) }.is_err() {
                    debug!("pipe still busy after wait (attempt {})", attempt + 1);
                }
            }
            Err(e) => {
                debug!("connect attempt {} failed: {}", attempt + 1, e);
                thread::sleep(Duration::from_millis(500));
            }
        }
    }

    let handle = handle.ok_or(Error::IpcNotConnected)?;

    let mode = PIPE_READMODE_MESSAGE;
    // SAFETY: handle is an open pipe handle; mode outlives the call.
    unsafe { SetNamedPipeHandleState(handle, Some(&mode), None, None) }.map_err(|e| {
        // SAFETY: closing the handle we just opened.
        unsafe {
            let _ = CloseHandle(handle);
        }
        Error::IpcProtocol(format!("failed to set message read mode: {}", e))
    })?;

    info!("connected to {}", name);
    Ok(PipeStream::pair(handle))
}

/// Server endpoint. Each `accept` creates a fresh pipe instance and blocks
/// until a client connects to it.
pub struct PipeListener {
    name: HSTRING,
}

impl PipeListener {
    pub fn bind(name: &str) -> Self {
        Self {
            name: HSTRING::from(name),
        }
    }

    pub fn accept(&self) -> Result<(PipeStream, PipeStream)> {
        // SAFETY: name is a valid pipe name; buffer sizes are advisory.
        let handle = unsafe {
            CreateNamedPipeW(
                &self.name,
                PIPE_ACCESS_DUPLEX,
                PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT,
                PIPE_UNLIMITED_INSTANCES,
                PIPE_BUFFER_SIZE,
                PIPE_BUFFER_SIZE,
                0,
                None,
            )
        };
        if handle.is_invalid() {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        // SAFETY: handle is the pipe instance created above.
        let connected = unsafe { ConnectNamedPipe(handle, None) };
        if let Err(e) = connected {
            // The client can land between create and connect.
            if e.code() != ERROR_PIPE_CONNECTED.to_hresult() {
                // SAFETY: closing the instance we created.
                unsafe {
                    let _ = CloseHandle(handle);
                }
                return Err(Error::Io(io::Error::other(e)));
            }
        }

        info!("client connected");
        Ok(PipeStream::pair(handle))
    }
}
