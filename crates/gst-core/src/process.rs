//! Target process access: handles, module listing, privilege probes, and
//! remote module injection.
//!
//! Everything here is Windows; the non-Windows builds keep the same surface
//! and report the operations as unavailable.

use serde::Serialize;

use crate::error::Result;

/// One loaded module of the target process.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub base: u64,
    pub size: u64,
}

#[cfg(target_os = "windows")]
pub use windows_impl::*;

#[cfg(not(target_os = "windows"))]
pub use fallback_impl::*;

#[cfg(target_os = "windows")]
mod windows_impl {
    use std::ffi::c_void;
    use std::mem;

    use tracing::{debug, warn};
    use windows::core::{s, HSTRING};
    use windows::Win32::Foundation::{CloseHandle, ERROR_ACCESS_DENIED, HANDLE, HMODULE};
    use windows::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
    use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
    use windows::Win32::System::Memory::{
        VirtualAllocEx, VirtualFreeEx, VirtualProtectEx, VirtualQueryEx, MEMORY_BASIC_INFORMATION,
        MEM_COMMIT, MEM_FREE, MEM_RELEASE, MEM_RESERVE, PAGE_PROTECTION_FLAGS, PAGE_READWRITE,
    };
    use windows::Win32::System::ProcessStatus::{
        K32EnumProcessModulesEx, K32GetModuleBaseNameW, K32GetModuleInformation,
        LIST_MODULES_ALL, MODULEINFO,
    };
    use windows::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
    use windows::Win32::System::Threading::{
        CreateRemoteThread, GetCurrentProcess, GetExitCodeThread, IsWow64Process, OpenProcess,
        OpenProcessToken, WaitForSingleObject, PROCESS_ALL_ACCESS, PROCESS_QUERY_INFORMATION,
        PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE,
    };

    use super::ModuleInfo;
    use crate::error::{Error, Result};
    use crate::memory::{ProcessMemory, RegionInfo, RegionState};

    /// Open handle to a target process. Closed on drop.
    pub struct ProcessHandle {
        handle: HANDLE,
        pid: u32,
        min_address: u64,
        max_address: u64,
    }

    // The handle is used for cross-process memory APIs only, which are safe
    // to issue from any thread.
    unsafe impl Send for ProcessHandle {}

    impl ProcessHandle {
        /// Open with read, write and protection rights for patching.
        pub fn open(pid: u32) -> Result<Self> {
            Self::open_with(
                pid,
                PROCESS_VM_READ | PROCESS_VM_WRITE | PROCESS_VM_OPERATION | PROCESS_QUERY_INFORMATION,
            )
        }

        /// Open with read rights only, enough for scanning.
        pub fn open_read(pid: u32) -> Result<Self> {
            Self::open_with(pid, PROCESS_VM_READ | PROCESS_QUERY_INFORMATION)
        }

        fn open_with(
            pid: u32,
            access: windows::Win32::System::Threading::PROCESS_ACCESS_RIGHTS,
        ) -> Result<Self> {
            // SAFETY: plain process-open call; failure is returned as Err.
            let handle = unsafe { OpenProcess(access, false, pid) }.map_err(|e| {
                if e.code() == ERROR_ACCESS_DENIED.to_hresult() {
                    Error::PrivilegeDenied(format!("cannot open process {}: {}", pid, e))
                } else {
                    Error::ProcessUnavailable(format!("cannot open process {}: {}", pid, e))
                }
            })?;

            let mut info = SYSTEM_INFO::default();
            // SAFETY: out-parameter fill of a plain struct.
            unsafe { GetSystemInfo(&mut info) };

            Ok(Self {
                handle,
                pid,
                min_address: info.lpMinimumApplicationAddress as u64,
                max_address: info.lpMaximumApplicationAddress as u64,
            })
        }

        pub fn pid(&self) -> u32 {
            self.pid
        }
    }

    impl Drop for ProcessHandle {
        fn drop(&mut self) {
            // SAFETY: the handle was opened by us and is closed exactly once.
            unsafe {
                let _ = CloseHandle(self.handle);
            }
        }
    }

    impl ProcessMemory for ProcessHandle {
        fn min_address(&self) -> u64 {
            self.min_address
        }

        fn max_address(&self) -> u64 {
            self.max_address
        }

        fn query(&self, address: u64) -> Option<RegionInfo> {
            let mut mbi = MEMORY_BASIC_INFORMATION::default();
            // SAFETY: mbi is a valid out-buffer of the queried size.
            let written = unsafe {
                VirtualQueryEx(
                    self.handle,
                    Some(address as *const c_void),
                    &mut mbi,
                    mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if written == 0 {
                return None;
            }

            let state = if mbi.State == MEM_COMMIT {
                RegionState::Committed
            } else if mbi.State == MEM_FREE {
                RegionState::Free
            } else {
                RegionState::Reserved
            };

            Some(RegionInfo {
                base: mbi.BaseAddress as u64,
                size: mbi.RegionSize as u64,
                protect: mbi.Protect.0,
                state,
            })
        }

        fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
            let mut buffer = vec![0u8; size];
            let mut read = 0usize;
            // SAFETY: buffer holds `size` bytes; read receives the count.
            unsafe {
                ReadProcessMemory(
                    self.handle,
                    address as *const c_void,
                    buffer.as_mut_ptr() as *mut c_void,
                    size,
                    Some(&mut read),
                )
            }
            .map_err(|e| Error::region_unreadable(address, e.to_string()))?;

            buffer.truncate(read);
            Ok(buffer)
        }

        fn write_bytes(&mut self, address: u64, bytes: &[u8]) -> Result<usize> {
            let mut written = 0usize;
            // SAFETY: bytes outlives the call; written receives the count.
            unsafe {
                WriteProcessMemory(
                    self.handle,
                    address as *const c_void,
                    bytes.as_ptr() as *const c_void,
                    bytes.len(),
                    Some(&mut written),
                )
            }
            .map_err(|e| Error::region_unwritable(address, e.to_string()))?;

            Ok(written)
        }

        fn set_protection(&mut self, address: u64, size: usize, protect: u32) -> Result<u32> {
            let mut old = PAGE_PROTECTION_FLAGS(0);
            // SAFETY: old receives the prior protection.
            unsafe {
                VirtualProtectEx(
                    self.handle,
                    address as *const c_void,
                    size,
                    PAGE_PROTECTION_FLAGS(protect),
                    &mut old,
                )
            }
            .map_err(|e| Error::region_unwritable(address, e.to_string()))?;

            Ok(old.0)
        }
    }

    /// List the target's loaded modules with their base address and size.
    pub fn get_process_modules(pid: u32) -> Result<Vec<ModuleInfo>> {
        let process = ProcessHandle::open_read(pid)?;

        let mut handles = vec![HMODULE::default(); 1024];
        let mut needed = 0u32;
        // SAFETY: handles is a valid out-array of the declared byte size.
        unsafe {
            K32EnumProcessModulesEx(
                process.handle,
                handles.as_mut_ptr(),
                (handles.len() * mem::size_of::<HMODULE>()) as u32,
                &mut needed,
                LIST_MODULES_ALL,
            )
        }
        .ok()
        .map_err(|e| Error::ProcessUnavailable(format!("module enumeration failed: {}", e)))?;

        let count = (needed as usize / mem::size_of::<HMODULE>()).min(handles.len());
        let mut modules = Vec::with_capacity(count);

        for &module in &handles[..count] {
            let mut name_buf = [0u16; 260];
            // SAFETY: name_buf is a valid out-buffer.
            let name_len = unsafe { K32GetModuleBaseNameW(process.handle, module, &mut name_buf) };
            let name = String::from_utf16_lossy(&name_buf[..name_len as usize]);

            let mut info = MODULEINFO::default();
            // SAFETY: info is a valid out-struct of the declared size.
            let ok = unsafe {
                K32GetModuleInformation(
                    process.handle,
                    module,
                    &mut info,
                    mem::size_of::<MODULEINFO>() as u32,
                )
            };
            if !ok.as_bool() {
                debug!("skipping module {:?}: no module information", name);
                continue;
            }

            modules.push(ModuleInfo {
                name,
                base: info.lpBaseOfDll as u64,
                size: info.SizeOfImage as u64,
            });
        }

        Ok(modules)
    }

    /// Whether the target runs as a native 64-bit process.
    pub fn is_process_64_bit(pid: u32) -> Result<bool> {
        let process = ProcessHandle::open_read(pid)?;
        let mut wow64 = windows::Win32::Foundation::BOOL(0);
        // SAFETY: wow64 receives the answer.
        unsafe { IsWow64Process(process.handle, &mut wow64) }
            .map_err(|e| Error::ProcessUnavailable(format!("wow64 probe failed: {}", e)))?;
        Ok(!wow64.as_bool())
    }

    /// Whether the current process runs elevated.
    pub fn has_admin_privileges() -> bool {
        let mut token = HANDLE::default();
        // SAFETY: token receives the opened handle on success.
        if unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) }.is_err() {
            return false;
        }

        let mut elevation = TOKEN_ELEVATION::default();
        let mut returned = 0u32;
        // SAFETY: elevation is a valid out-struct of the declared size.
        let result = unsafe {
            GetTokenInformation(
                token,
                TokenElevation,
                Some(&mut elevation as *mut TOKEN_ELEVATION as *mut c_void),
                mem::size_of::<TOKEN_ELEVATION>() as u32,
                &mut returned,
            )
        };
        // SAFETY: closing the token we opened.
        unsafe {
            let _ = CloseHandle(token);
        }

        result.is_ok() && elevation.TokenIsElevated != 0
    }

    /// Load a module into the target by remote-threading `LoadLibraryW`.
    ///
    /// The path buffer allocated in the target is freed whether or not the
    /// load succeeded.
    pub fn inject_module(pid: u32, dll_path: &str) -> Result<()> {
        // SAFETY: plain process-open call; failure is returned as Err.
        let process = unsafe { OpenProcess(PROCESS_ALL_ACCESS, false, pid) }.map_err(|e| {
            if e.code() == ERROR_ACCESS_DENIED.to_hresult() {
                Error::PrivilegeDenied(format!("cannot open process {}: {}", pid, e))
            } else {
                Error::ProcessUnavailable(format!("cannot open process {}: {}", pid, e))
            }
        })?;

        let result = inject_into(process, dll_path);
        // SAFETY: closing the handle we opened.
        unsafe {
            let _ = CloseHandle(process);
        }
        result
    }

    fn inject_into(process: HANDLE, dll_path: &str) -> Result<()> {
        let path_utf16: Vec<u16> = dll_path.encode_utf16().chain(std::iter::once(0)).collect();
        let path_bytes = path_utf16.len() * 2;

        // SAFETY: allocation in the target; checked for null below.
        let remote = unsafe {
            VirtualAllocEx(
                process,
                None,
                path_bytes,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if remote.is_null() {
            return Err(Error::hook_install_failed(
                dll_path,
                "remote allocation failed",
            ));
        }

        let outcome = (|| {
            let mut written = 0usize;
            // SAFETY: remote points at a live allocation of path_bytes.
            unsafe {
                WriteProcessMemory(
                    process,
                    remote,
                    path_utf16.as_ptr() as *const c_void,
                    path_bytes,
                    Some(&mut written),
                )
            }
            .map_err(|e| Error::hook_install_failed(dll_path, format!("path write failed: {}", e)))?;

            // SAFETY: kernel32 is always loaded; the export name is valid.
            let kernel32 = unsafe { GetModuleHandleW(&HSTRING::from("kernel32.dll")) }
                .map_err(|e| Error::hook_install_failed(dll_path, e.to_string()))?;
            // SAFETY: kernel32 is a valid module handle.
            let load_library = unsafe { GetProcAddress(kernel32, s!("LoadLibraryW")) }
                .ok_or_else(|| Error::hook_install_failed(dll_path, "LoadLibraryW not found"))?;

            // LoadLibraryW has the thread-routine shape modulo the return
            // width, which the remote-thread convention tolerates.
            let routine: unsafe extern "system" fn(*mut c_void) -> u32 =
                // SAFETY: pointer-to-pointer transmute of a valid export.
                unsafe { mem::transmute(load_library) };

            // SAFETY: routine and remote are valid in the target.
            let thread = unsafe {
                CreateRemoteThread(process, None, 0, Some(routine), Some(remote), 0, None)
            }
            .map_err(|e| {
                Error::hook_install_failed(dll_path, format!("remote thread failed: {}", e))
            })?;

            // SAFETY: thread is the handle created above.
            unsafe { WaitForSingleObject(thread, 10_000) };
            let mut exit_code = 0u32;
            // SAFETY: exit_code receives the value.
            let exited = unsafe { GetExitCodeThread(thread, &mut exit_code) };
            // SAFETY: closing the thread handle we created.
            unsafe {
                let _ = CloseHandle(thread);
            }

            if exited.is_err() || exit_code == 0 {
                return Err(Error::hook_install_failed(
                    dll_path,
                    "LoadLibraryW returned null in target",
                ));
            }
            Ok(())
        })();

        // SAFETY: freeing the allocation made above.
        if let Err(e) = unsafe { VirtualFreeEx(process, remote, 0, MEM_RELEASE) } {
            warn!("failed to free remote path buffer: {}", e);
        }

        outcome
    }
}

#[cfg(not(target_os = "windows"))]
mod fallback_impl {
    use super::ModuleInfo;
    use crate::error::{Error, Result};
    use crate::memory::{ProcessMemory, RegionInfo};

    /// Open handle to a target process; only available on Windows.
    pub struct ProcessHandle {
        pid: u32,
    }

    impl ProcessHandle {
        pub fn open(pid: u32) -> Result<Self> {
            let _ = pid;
            Err(Error::ProcessUnavailable(
                "process access is only supported on Windows".to_string(),
            ))
        }

        pub fn open_read(pid: u32) -> Result<Self> {
            Self::open(pid)
        }

        pub fn pid(&self) -> u32 {
            self.pid
        }
    }

    impl ProcessMemory for ProcessHandle {
        fn min_address(&self) -> u64 {
            0
        }

        fn max_address(&self) -> u64 {
            0
        }

        fn query(&self, _address: u64) -> Option<RegionInfo> {
            None
        }

        fn read_bytes(&self, address: u64, _size: usize) -> Result<Vec<u8>> {
            Err(Error::region_unreadable(address, "unsupported platform"))
        }

        fn write_bytes(&mut self, address: u64, _bytes: &[u8]) -> Result<usize> {
            Err(Error::region_unwritable(address, "unsupported platform"))
        }

        fn set_protection(&mut self, address: u64, _size: usize, _protect: u32) -> Result<u32> {
            Err(Error::region_unwritable(address, "unsupported platform"))
        }
    }

    pub fn get_process_modules(_pid: u32) -> Result<Vec<ModuleInfo>> {
        Err(Error::ProcessUnavailable(
            "module enumeration is only supported on Windows".to_string(),
        ))
    }

    pub fn is_process_64_bit(_pid: u32) -> Result<bool> {
        Err(Error::ProcessUnavailable(
            "process probing is only supported on Windows".to_string(),
        ))
    }

    pub fn has_admin_privileges() -> bool {
        false
    }

    pub fn inject_module(_pid: u32, dll_path: &str) -> Result<()> {
        Err(Error::hook_install_failed(
            dll_path,
            "module injection is only supported on Windows",
        ))
    }
}
