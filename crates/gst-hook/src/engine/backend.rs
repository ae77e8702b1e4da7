//! Platform capabilities the hook engine needs: executable allocation and
//! code writes in the current process.

use super::EngineError;

/// Capability set behind the engine. The live backend talks to the OS; the
/// test backend runs against an owned byte arena.
pub trait HookBackend {
    /// Allocate `size` bytes of executable memory, returning its address.
    fn alloc_executable(&mut self, size: usize) -> Result<u64, EngineError>;

    /// Release an allocation made by `alloc_executable`.
    fn free_executable(&mut self, address: u64, size: usize);

    /// Copy `buf.len()` bytes from `address`.
    fn read_code(&self, address: u64, buf: &mut [u8]) -> Result<(), EngineError>;

    /// Write `bytes` at `address`, handling protection changes and
    /// instruction-cache coherency.
    fn write_code(&mut self, address: u64, bytes: &[u8]) -> Result<(), EngineError>;
}

#[cfg(target_os = "windows")]
pub use windows_backend::PlatformBackend;

#[cfg(target_os = "windows")]
mod windows_backend {
    use std::ffi::c_void;

    use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
    use windows::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
        PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS,
    };
    use windows::Win32::System::Threading::GetCurrentProcess;

    use super::super::EngineError;
    use super::HookBackend;

    /// In-process backend over the virtual-memory API.
    #[derive(Default)]
    pub struct PlatformBackend;

    impl HookBackend for PlatformBackend {
        fn alloc_executable(&mut self, size: usize) -> Result<u64, EngineError> {
            // SAFETY: fresh allocation, checked for null.
            let address =
                unsafe { VirtualAlloc(None, size, MEM_COMMIT | MEM_RESERVE, PAGE_EXECUTE_READWRITE) };
            if address.is_null() {
                return Err(EngineError::Backend("executable allocation failed".into()));
            }
            Ok(address as u64)
        }

        fn free_executable(&mut self, address: u64, _size: usize) {
            // SAFETY: address came from alloc_executable.
            unsafe {
                let _ = VirtualFree(address as *mut c_void, 0, MEM_RELEASE);
            }
        }

        fn read_code(&self, address: u64, buf: &mut [u8]) -> Result<(), EngineError> {
            // SAFETY: the engine only reads prologues of resolved, mapped
            // functions in this process.
            unsafe {
                std::ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len());
            }
            Ok(())
        }

        fn write_code(&mut self, address: u64, bytes: &[u8]) -> Result<(), EngineError> {
            let mut old = PAGE_PROTECTION_FLAGS(0);
            // SAFETY: re-protecting the span we are about to write.
            unsafe {
                VirtualProtect(
                    address as *const c_void,
                    bytes.len(),
                    PAGE_EXECUTE_READWRITE,
                    &mut old,
                )
            }
            .map_err(|e| EngineError::Backend(format!("protect failed: {}", e)))?;

            // SAFETY: the span is now writable; source and destination do
            // not overlap.
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
            }

            // SAFETY: restoring the prior protection over the same span.
            let restore = unsafe {
                VirtualProtect(
                    address as *const c_void,
                    bytes.len(),
                    if old.0 == 0 { PAGE_EXECUTE_READ } else { old },
                    &mut old,
                )
            };
            if let Err(e) = restore {
                tracing::warn!("failed to restore code protection at {:#x}: {}", address, e);
            }

            // SAFETY: flushing the span we just rewrote.
            unsafe {
                let _ = FlushInstructionCache(
                    GetCurrentProcess(),
                    Some(address as *const c_void),
                    bytes.len(),
                );
            }
            Ok(())
        }
    }
}

/// Byte-arena backend for tests: a fake code segment at a fixed base plus a
/// bump-allocated trampoline area.
#[cfg(test)]
pub mod testing {
    use super::super::EngineError;
    use super::HookBackend;

    pub const ARENA_BASE: u64 = 0x10_0000;
    const TRAMPOLINE_AREA: usize = 0x1000;

    pub struct ArenaBackend {
        bytes: Vec<u8>,
        next_alloc: usize,
    }

    impl ArenaBackend {
        /// Seed the arena's code area with `code` at `ARENA_BASE`.
        pub fn with_code(code: &[u8]) -> Self {
            let mut bytes = vec![0xCCu8; 0x2000 + TRAMPOLINE_AREA];
            bytes[..code.len()].copy_from_slice(code);
            Self {
                bytes,
                next_alloc: 0x2000,
            }
        }

        pub fn bytes_at(&self, address: u64, len: usize) -> &[u8] {
            let offset = (address - ARENA_BASE) as usize;
            &self.bytes[offset..offset + len]
        }
    }

    impl HookBackend for ArenaBackend {
        fn alloc_executable(&mut self, size: usize) -> Result<u64, EngineError> {
            if self.next_alloc + size > self.bytes.len() {
                return Err(EngineError::Backend("arena exhausted".into()));
            }
            let address = ARENA_BASE + self.next_alloc as u64;
            self.next_alloc += size;
            Ok(address)
        }

        fn free_executable(&mut self, _address: u64, _size: usize) {}

        fn read_code(&self, address: u64, buf: &mut [u8]) -> Result<(), EngineError> {
            let offset = (address - ARENA_BASE) as usize;
            if offset + buf.len() > self.bytes.len() {
                return Err(EngineError::Backend("read out of arena".into()));
            }
            buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
            Ok(())
        }

        fn write_code(&mut self, address: u64, bytes: &[u8]) -> Result<(), EngineError> {
            let offset = (address - ARENA_BASE) as usize;
            if offset + bytes.len() > self.bytes.len() {
                return Err(EngineError::Backend("write out of arena".into()));
            }
            self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }
}
