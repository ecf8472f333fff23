// Copyright 2026 the Lockstep Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! OpenGL sync objects and X11 fence import.

use std::ffi::c_void;
use std::fmt;
use std::time::Duration;

use glow::HasContext as _;
use lockstep_core::backend::WaitStatus;
use lockstep_core::error::{BackendError, BackendOp, FenceError};

use crate::convert::{client_wait_nanos, wait_status};

/// `GL_SYNC_X11_FENCE_EXT` from `GL_EXT_x11_sync_object`.
const SYNC_X11_FENCE_EXT: u32 = 0x90E1;

/// `glImportSyncEXT(external_sync_type, external_sync, flags)`.
type ImportSyncFn =
    unsafe extern "system" fn(external_sync_type: u32, external_sync: isize, flags: u32) -> *const c_void;

/// A `glow` context plus the one entry point `glow` does not bind.
pub(crate) struct GlSync {
    gl: glow::Context,
    import_sync: Option<ImportSyncFn>,
}

impl fmt::Debug for GlSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlSync")
            .field("version", &self.gl.version())
            .field("import_sync", &self.import_sync.is_some())
            .finish_non_exhaustive()
    }
}

impl GlSync {
    /// Wraps `gl` and resolves `glImportSyncEXT` through `loader`.
    ///
    /// # Safety
    ///
    /// `loader` must return either null or the address of the named GL entry
    /// point for the context `gl` was created from.
    pub(crate) unsafe fn new(
        gl: glow::Context,
        mut loader: impl FnMut(&str) -> *const c_void,
    ) -> Self {
        let raw = loader("glImportSyncEXT");
        let import_sync = if raw.is_null() {
            None
        } else {
            // SAFETY: non-null, and the caller guarantees it is the
            // glImportSyncEXT entry point, whose C signature ImportSyncFn
            // matches.
            Some(unsafe { std::mem::transmute::<*const c_void, ImportSyncFn>(raw) })
        };
        Self { gl, import_sync }
    }

    /// Checks for GL sync objects and X11 fence import.
    pub(crate) fn probe(&self) -> Result<(), FenceError> {
        let version = self.gl.version();
        let core_sync = !version.is_embedded && (version.major, version.minor) >= (3, 2);
        let extensions = self.gl.supported_extensions();
        if !core_sync && !extensions.contains("GL_ARB_sync") {
            return Err(FenceError::Unavailable("GL_ARB_sync"));
        }
        if self.import_sync.is_none() || !extensions.contains("GL_EXT_x11_sync_object") {
            return Err(FenceError::Unavailable("GL_EXT_x11_sync_object"));
        }
        Ok(())
    }

    pub(crate) fn import(&self, xfence: u32) -> Result<glow::NativeFence, BackendError> {
        let Some(import_sync) = self.import_sync else {
            return Err(BackendError::new(
                BackendOp::ImportFence,
                "glImportSyncEXT not available",
            ));
        };
        // SAFETY: the entry point was resolved for this context, which the
        // backend contract requires to be current.
        let sync = unsafe { import_sync(SYNC_X11_FENCE_EXT, xfence as isize, 0) };
        if sync.is_null() {
            return Err(BackendError::new(
                BackendOp::ImportFence,
                format!("glImportSyncEXT returned null for fence {xfence:#x}"),
            ));
        }
        Ok(glow::NativeFence(sync as _))
    }

    pub(crate) fn wait(&self, fence: glow::NativeFence) {
        // SAFETY: `fence` is a live sync object of this context.
        unsafe { self.gl.wait_sync(fence, 0, glow::TIMEOUT_IGNORED) };
    }

    pub(crate) fn fence(&self) -> Result<glow::NativeFence, BackendError> {
        // SAFETY: plain GL call on the current context.
        unsafe { self.gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }
            .map_err(|message| BackendError::new(BackendOp::InsertFence, message))
    }

    pub(crate) fn client_wait(
        &self,
        fence: glow::NativeFence,
        timeout: Duration,
    ) -> Result<WaitStatus, BackendError> {
        // SAFETY: `fence` is a live sync object of this context.
        let status = unsafe {
            self.gl
                .client_wait_sync(fence, glow::SYNC_FLUSH_COMMANDS_BIT, client_wait_nanos(timeout))
        };
        wait_status(status).ok_or_else(|| {
            // SAFETY: plain GL call on the current context.
            let error = unsafe { self.gl.get_error() };
            BackendError::new(
                BackendOp::ClientWait,
                format!("glClientWaitSync failed (status {status:#x}, error {error:#x})"),
            )
        })
    }

    pub(crate) fn delete(&self, fence: glow::NativeFence) {
        // SAFETY: `fence` is a live sync object of this context and is not
        // used again.
        unsafe { self.gl.delete_sync(fence) };
    }
}
