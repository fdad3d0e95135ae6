//! Shared Region Carrier
//!
//! Named shared-memory creation (producer side) and attach (consumer
//! side). The carrier is a dumb byte window: it knows nothing about the
//! header layout, only how to map `name` to a base pointer + length and
//! release the mapping on every exit path.
//!
//! # Platform Mapping
//!
//! | Platform | Backing | Namespace |
//! |----------|---------|-----------|
//! | unix     | file in `/dev/shm` (fallback: temp dir), `memmap2` | single |
//! | Windows  | pagefile-backed named section | `Local\` / `Global\` |
//!
//! The kernel-mode consumer reaches the same Windows section through the
//! NT object namespace (`\BaseNamedObjects\<name>`); from user mode that
//! corresponds to the `Global\` prefix used by [`Namespace::Global`].
//!
//! Regions may outlive a crashed producer ("stale" regions): `create`
//! therefore re-initializes an existing object of the same name by
//! zeroing its contents.

use std::ptr::NonNull;

use crate::error::{ProtocolError, ProtocolResult};
use crate::header::HEADER_BYTES;

/// Which OS object namespace to resolve a region name in.
///
/// On unix there is a single namespace and both variants are equivalent.
/// On Windows, `Global` addresses the session-independent namespace that
/// services and the kernel consumer see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Local,
    Global,
}

/// A mapped shared-memory region.
///
/// Created exactly once by the producer, attached read-write by
/// consumers (consumers mutate only `read_pos`). Dropping the handle
/// unmaps the view; the creating side also unlinks the named object.
pub struct SharedRegion {
    ptr: NonNull<u8>,
    len: usize,
    owner: bool,
    name: String,

    #[cfg(unix)]
    _map: memmap2::MmapRaw,
    #[cfg(unix)]
    path: std::path::PathBuf,

    #[cfg(target_os = "windows")]
    mapping: windows::Win32::Foundation::HANDLE,
}

// The region is shared across threads by design; all access to its
// contents goes through the atomic protocol in `header`/`ring`.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create (or re-initialize) the named region with `total_bytes` of
    /// zeroed storage. Producer side only.
    pub fn create(name: &str, total_bytes: usize) -> ProtocolResult<Self> {
        if total_bytes < HEADER_BYTES {
            return Err(ProtocolError::RegionTooSmall {
                actual: total_bytes,
                needed: HEADER_BYTES,
            });
        }
        let region = Self::create_impl(name, total_bytes)?;
        tracing::info!(
            name,
            bytes = total_bytes,
            "created shared audio region"
        );
        Ok(region)
    }

    /// Attach to an existing named region in the local namespace.
    ///
    /// `RegionNotFound` means the producer isn't running; callers poll.
    pub fn attach(name: &str) -> ProtocolResult<Self> {
        Self::attach_in_namespace(name, Namespace::Local)
    }

    /// Attach through an explicit namespace (privileged consumers use
    /// [`Namespace::Global`]).
    pub fn attach_in_namespace(name: &str, namespace: Namespace) -> ProtocolResult<Self> {
        let region = Self::attach_impl(name, namespace)?;
        if region.len < HEADER_BYTES {
            // Mapped view smaller than the declared header.
            return Err(ProtocolError::RegionTooSmall {
                actual: region.len,
                needed: HEADER_BYTES,
            });
        }
        tracing::debug!(name, bytes = region.len, "attached shared audio region");
        Ok(region)
    }

    /// Raw base address of the mapping.
    pub fn base(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Total mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the region (and will unlink it).
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    // ── unix: file in /dev/shm, mapped with memmap2 ─────────────────────

    #[cfg(unix)]
    fn backing_path(name: &str) -> std::path::PathBuf {
        let shm = std::path::Path::new("/dev/shm");
        if shm.is_dir() {
            shm.join(name)
        } else {
            std::env::temp_dir().join(name)
        }
    }

    #[cfg(unix)]
    fn map_io_err(e: std::io::Error) -> ProtocolError {
        match e.kind() {
            std::io::ErrorKind::NotFound => ProtocolError::RegionNotFound,
            std::io::ErrorKind::PermissionDenied => {
                ProtocolError::PermissionDenied(e.to_string())
            }
            _ => ProtocolError::Platform(e.to_string()),
        }
    }

    #[cfg(unix)]
    fn create_impl(name: &str, total_bytes: usize) -> ProtocolResult<Self> {
        use std::fs::OpenOptions;

        let path = Self::backing_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(Self::map_io_err)?;

        // Shrink-then-grow zeroes the whole file, wiping any stale
        // contents left behind by an unclean producer exit.
        file.set_len(0).map_err(Self::map_io_err)?;
        file.set_len(total_bytes as u64).map_err(Self::map_io_err)?;

        let map = memmap2::MmapOptions::new()
            .map_raw(&file)
            .map_err(Self::map_io_err)?;
        let ptr = NonNull::new(map.as_mut_ptr())
            .ok_or_else(|| ProtocolError::Platform("mmap returned null".into()))?;

        Ok(Self {
            ptr,
            len: map.len(),
            owner: true,
            name: name.to_string(),
            _map: map,
            path,
        })
    }

    #[cfg(unix)]
    fn attach_impl(name: &str, _namespace: Namespace) -> ProtocolResult<Self> {
        use std::fs::OpenOptions;

        let path = Self::backing_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(Self::map_io_err)?;

        let map = memmap2::MmapOptions::new()
            .map_raw(&file)
            .map_err(Self::map_io_err)?;
        let ptr = NonNull::new(map.as_mut_ptr())
            .ok_or_else(|| ProtocolError::Platform("mmap returned null".into()))?;

        Ok(Self {
            ptr,
            len: map.len(),
            owner: false,
            name: name.to_string(),
            _map: map,
            path,
        })
    }

    // ── Windows: pagefile-backed named section ──────────────────────────

    #[cfg(target_os = "windows")]
    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    #[cfg(target_os = "windows")]
    fn qualified(name: &str, namespace: Namespace) -> String {
        match namespace {
            Namespace::Local => format!("Local\\{name}"),
            Namespace::Global => format!("Global\\{name}"),
        }
    }

    #[cfg(target_os = "windows")]
    fn create_impl(name: &str, total_bytes: usize) -> ProtocolResult<Self> {
        use windows::core::PCWSTR;
        use windows::Win32::Foundation::INVALID_HANDLE_VALUE;
        use windows::Win32::System::Memory::{
            CreateFileMappingW, MapViewOfFile, FILE_MAP_ALL_ACCESS, PAGE_READWRITE,
        };

        let wide_name = Self::wide(&Self::qualified(name, Namespace::Local));

        // SAFETY: valid nul-terminated name, pagefile-backed mapping.
        let mapping = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                None,
                PAGE_READWRITE,
                (total_bytes as u64 >> 32) as u32,
                total_bytes as u32,
                PCWSTR::from_raw(wide_name.as_ptr()),
            )
        }
        .map_err(|e| ProtocolError::Platform(format!("CreateFileMappingW failed: {e}")))?;

        // SAFETY: mapping handle is valid; a zero length maps the view.
        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
        let Some(ptr) = NonNull::new(view.Value.cast::<u8>()) else {
            unsafe {
                let _ = windows::Win32::Foundation::CloseHandle(mapping);
            }
            return Err(ProtocolError::Platform("MapViewOfFile returned null".into()));
        };

        // CreateFileMappingW returns an existing section when the name is
        // taken; wipe it so stale producer state can't leak through.
        // SAFETY: the view spans total_bytes writable bytes.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, total_bytes) };

        Ok(Self {
            ptr,
            len: total_bytes,
            owner: true,
            name: name.to_string(),
            mapping,
        })
    }

    #[cfg(target_os = "windows")]
    fn attach_impl(name: &str, namespace: Namespace) -> ProtocolResult<Self> {
        use windows::core::PCWSTR;
        use windows::Win32::Foundation::{ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND};
        use windows::Win32::System::Memory::{
            MapViewOfFile, OpenFileMappingW, VirtualQuery, FILE_MAP_ALL_ACCESS,
            MEMORY_BASIC_INFORMATION,
        };

        let wide_name = Self::wide(&Self::qualified(name, namespace));

        // SAFETY: valid nul-terminated name.
        let mapping = unsafe {
            OpenFileMappingW(FILE_MAP_ALL_ACCESS.0, false, PCWSTR::from_raw(wide_name.as_ptr()))
        }
        .map_err(|e| {
            if e.code() == ERROR_FILE_NOT_FOUND.to_hresult() {
                ProtocolError::RegionNotFound
            } else if e.code() == ERROR_ACCESS_DENIED.to_hresult() {
                ProtocolError::PermissionDenied(e.to_string())
            } else {
                ProtocolError::Platform(format!("OpenFileMappingW failed: {e}"))
            }
        })?;

        // SAFETY: mapping handle is valid; zero length maps the full view.
        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
        let Some(ptr) = NonNull::new(view.Value.cast::<u8>()) else {
            unsafe {
                let _ = windows::Win32::Foundation::CloseHandle(mapping);
            }
            return Err(ProtocolError::Platform("MapViewOfFile returned null".into()));
        };

        // The section carries its size; recover it from the view.
        let mut info = MEMORY_BASIC_INFORMATION::default();
        // SAFETY: ptr is a live view base.
        let queried = unsafe {
            VirtualQuery(
                Some(ptr.as_ptr().cast()),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if queried == 0 {
            unsafe {
                let _ = windows::Win32::System::Memory::UnmapViewOfFile(view);
                let _ = windows::Win32::Foundation::CloseHandle(mapping);
            }
            return Err(ProtocolError::Platform("VirtualQuery failed".into()));
        }

        Ok(Self {
            ptr,
            len: info.RegionSize,
            owner: false,
            name: name.to_string(),
            mapping,
        })
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            // memmap2 unmaps the view; the creator also unlinks the
            // backing file so consumers see RegionNotFound afterwards.
            if self.owner {
                let _ = std::fs::remove_file(&self.path);
            }
        }

        #[cfg(target_os = "windows")]
        {
            use windows::Win32::System::Memory::{
                UnmapViewOfFile, MEMORY_MAPPED_VIEW_ADDRESS,
            };
            // SAFETY: view and handle were acquired in create/attach and
            // are released exactly once here.
            unsafe {
                let _ = UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                    Value: self.ptr.as_ptr().cast(),
                });
                let _ = windows::Win32::Foundation::CloseHandle(self.mapping);
            }
        }
    }
}
