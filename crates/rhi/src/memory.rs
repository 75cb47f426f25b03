//! Memory type lookup and residency classes.
//!
//! gpu-allocator does the sub-allocation; this module decides *where* a buffer
//! must live and checks the device can satisfy it.

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::error::{RhiError, RhiResult};

/// Where a buffer's memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryResidency {
    /// Host-visible and coherent. Staging and per-frame uniforms.
    HostCoherent,
    /// Device-local. Static vertex and index data.
    DeviceLocal,
    /// Host-visible, preferably cached. Debug readback targets.
    Readback,
}

impl MemoryResidency {
    /// Property flags a memory type must have.
    pub fn property_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryResidency::HostCoherent | MemoryResidency::Readback => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            MemoryResidency::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
    }

    /// gpu-allocator location matching this residency.
    pub fn location(self) -> MemoryLocation {
        match self {
            MemoryResidency::HostCoherent => MemoryLocation::CpuToGpu,
            MemoryResidency::DeviceLocal => MemoryLocation::GpuOnly,
            MemoryResidency::Readback => MemoryLocation::GpuToCpu,
        }
    }

    #[inline]
    pub fn is_host_visible(self) -> bool {
        self.property_flags()
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }
}

/// Returns the lowest memory type index allowed by `type_filter` whose
/// property flags contain all of `required`.
///
/// # Errors
///
/// [`RhiError::NoMatchingMemoryType`] if no type qualifies.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> RhiResult<u32> {
    let count = (properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);

    properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|&(i, memory_type)| {
            type_filter & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
        .ok_or(RhiError::NoMatchingMemoryType {
            type_filter,
            required,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST_VISIBLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_COHERENT;
    const HOST_CACHED: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_CACHED;

    /// A table shaped like a typical discrete GPU.
    fn synthetic_table() -> vk::PhysicalDeviceMemoryProperties {
        let flags = [
            DEVICE_LOCAL,
            HOST_VISIBLE | HOST_COHERENT,
            HOST_VISIBLE | HOST_COHERENT | HOST_CACHED,
            DEVICE_LOCAL | HOST_VISIBLE | HOST_COHERENT,
        ];

        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            memory_heap_count: 2,
            ..Default::default()
        };
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: *f,
                heap_index: if f.contains(DEVICE_LOCAL) { 0 } else { 1 },
            };
        }
        props
    }

    #[test]
    fn test_lowest_matching_index() {
        let props = synthetic_table();
        assert_eq!(find_memory_type(&props, 0b1111, DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(
            find_memory_type(&props, 0b1111, HOST_VISIBLE | HOST_COHERENT).unwrap(),
            1
        );
    }

    #[test]
    fn test_filter_excludes_lower_types() {
        let props = synthetic_table();
        assert_eq!(find_memory_type(&props, 0b1000, DEVICE_LOCAL).unwrap(), 3);
        assert_eq!(
            find_memory_type(&props, 0b1100, HOST_VISIBLE | HOST_COHERENT).unwrap(),
            2
        );
    }

    #[test]
    fn test_superset_of_properties_matches() {
        let props = synthetic_table();
        assert_eq!(find_memory_type(&props, 0b0100, HOST_VISIBLE).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::empty()).unwrap(),
            0
        );
    }

    #[test]
    fn test_no_match_fails() {
        let props = synthetic_table();

        let err = find_memory_type(&props, 0b0001, HOST_VISIBLE).unwrap_err();
        assert!(matches!(
            err,
            RhiError::NoMatchingMemoryType { type_filter: 0b0001, .. }
        ));
        assert!(find_memory_type(&props, 0, DEVICE_LOCAL).is_err());
        assert!(find_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::LAZILY_ALLOCATED).is_err());
    }

    #[test]
    fn test_filter_bits_beyond_count_ignored() {
        let props = synthetic_table();
        assert!(find_memory_type(&props, 1 << 10, vk::MemoryPropertyFlags::empty()).is_err());
    }

    #[test]
    fn test_residency_flags() {
        assert!(MemoryResidency::HostCoherent.is_host_visible());
        assert!(MemoryResidency::Readback.is_host_visible());
        assert!(!MemoryResidency::DeviceLocal.is_host_visible());
        assert_eq!(MemoryResidency::DeviceLocal.location(), MemoryLocation::GpuOnly);
        assert_eq!(MemoryResidency::HostCoherent.location(), MemoryLocation::CpuToGpu);
        assert_eq!(MemoryResidency::Readback.location(), MemoryLocation::GpuToCpu);
    }
}
