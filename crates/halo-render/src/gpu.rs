//! GPU device initialization.
//!
//! Provides [`RenderContext`] which owns the wgpu instance, adapter, device
//! and queue for offscreen rendering, and [`RenderContextError`] for clear
//! diagnostics when initialization fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error type for render context initialization failures.
#[derive(Debug, thiserror::Error)]
pub enum RenderContextError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// Failed to request GPU device.
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}

/// Owns all GPU state: instance, adapter, device and queue.
pub struct RenderContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    device_lost: Arc<AtomicBool>,
}

impl RenderContext {
    /// Initialize a device that renders to offscreen targets only.
    pub async fn headless() -> Result<Self, RenderContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
        {
            Ok(adapter) => adapter,
            Err(_) => return Err(RenderContextError::NoAdapter),
        };

        let info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("halo-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        let device_lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&device_lost);
        device.set_device_lost_callback(move |reason, message| {
            log::error!("GPU device lost ({reason:?}): {message}");
            flag.store(true, Ordering::Release);
        });

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            device_lost,
        })
    }

    /// Whether the device has reported itself lost. Frames rendered after
    /// this point are skipped until a new context is created.
    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Acquire)
    }

    /// Shared flag other owners (e.g. the compositor backend) can poll.
    pub fn device_lost_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.device_lost)
    }
}

/// Initialize a headless GPU context synchronously using `pollster`.
pub fn init_headless_context_blocking() -> Result<RenderContext, RenderContextError> {
    pollster::block_on(RenderContext::headless())
}

/// Device and queue for unit tests; `None` on machines without an adapter.
#[cfg(test)]
pub(crate) fn test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    init_headless_context_blocking()
        .ok()
        .map(|ctx| (ctx.device, ctx.queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_context_fields_exist() {
        #[allow(dead_code)]
        fn assert_fields(ctx: &RenderContext) {
            let _: &wgpu::Instance = &ctx.instance;
            let _: &wgpu::Adapter = &ctx.adapter;
            let _: &wgpu::Device = &ctx.device;
            let _: &wgpu::Queue = &ctx.queue;
        }
    }

    #[test]
    fn test_fresh_context_is_not_lost() {
        let Ok(ctx) = init_headless_context_blocking() else {
            return;
        };
        assert!(!ctx.is_device_lost());
        assert!(!ctx.device_lost_flag().load(Ordering::Acquire));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RenderContextError::NoAdapter.to_string(),
            "no compatible GPU adapter found"
        );
    }
}
