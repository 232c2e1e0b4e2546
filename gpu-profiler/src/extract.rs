//! Kernel metadata extraction
//!
//! Turns a dispatch packet plus the kernel code descriptor it references into
//! a [`KernelLaunchRecord`].

use crate::error::ExtractError;
use crate::hsa::{DescriptorMemory, FinalizerMetadata, HsaRuntime};
use kernscope_shared::utils::thread::current_thread_id;
use kernscope_shared::{
    DispatchPacket, KernelLaunchRecord, ResourceLimits, ResourceUsage, UNKNOWN_KERNEL_NAME,
};
use tracing::{debug, error};

/// Collaborators needed to describe a dispatch
pub struct Extractor<'a> {
    pub finalizer: &'a dyn FinalizerMetadata,
    pub memory: &'a dyn DescriptorMemory,
    pub runtime: &'a dyn HsaRuntime,
}

impl Extractor<'_> {
    /// Build the launch record for `packet` dispatched to `device_name`.
    ///
    /// Fails without producing a record when the packet is absent, has a zero
    /// kernel object, or its kernel descriptor cannot be read.
    pub fn extract(
        &self,
        packet: Option<&DispatchPacket>,
        device_name: &str,
    ) -> Result<KernelLaunchRecord, ExtractError> {
        let packet = match packet {
            Some(p) if p.kernel_object != 0 => p,
            _ => {
                error!("Unable to get kernel stats from dispatch packet");
                return Err(ExtractError::MissingDispatchInfo);
            }
        };

        let symbol = self.finalizer.kernel_name(packet.kernel_object);
        if symbol.is_none() {
            debug!(
                "No symbol recorded for kernel object {:#x}",
                packet.kernel_object
            );
        }
        let kernel_name = format!(
            "{}_{}",
            symbol.as_deref().unwrap_or(UNKNOWN_KERNEL_NAME),
            device_name
        );

        let address = self
            .runtime
            .loaded_code_object_host_address(packet.kernel_object)
            .unwrap_or(packet.kernel_object);

        let descriptor = self.memory.read_descriptor(address).ok_or_else(|| {
            error!(
                "Unable to get kernel stats from dispatch packet: no code object at {:#x}",
                address
            );
            ExtractError::MissingCodeObject {
                kernel_object: packet.kernel_object,
            }
        })?;

        Ok(KernelLaunchRecord {
            kernel_name,
            device_name: device_name.to_string(),
            thread_id: current_thread_id(),
            work_dim: packet.work_dim(),
            work_group_size: packet.work_group_size(),
            global_work_size: packet.grid_size,
            usage: ResourceUsage {
                vgprs: Some(u32::from(descriptor.workitem_vgpr_count)),
                sgprs: Some(u32::from(descriptor.wavefront_sgpr_count)),
                lds_bytes: Some(descriptor.workgroup_group_segment_byte_size),
            },
            // TODO: query per-agent limits once the runtime exposes them
            limits: ResourceLimits::default(),
        })
    }
}
