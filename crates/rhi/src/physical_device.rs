//! Physical device (GPU) selection.
//!
//! Every enumerated GPU is checked for the required device extensions, an
//! adequate swapchain for the target surface and a queue family layout that
//! can render and present. Survivors are scored by [`score_device`] and the
//! highest score wins.
//!
//! Scoring is pure, so the ranking can be checked without a GPU:
//!
//! ```
//! use ash::vk;
//! use wrap_rhi::physical_device::{pick_best, score_device};
//!
//! let plain = vk::PhysicalDeviceFeatures::default();
//! let candidates = [
//!     ("cpu", score_device(vk::PhysicalDeviceType::CPU, &plain)),
//!     ("igpu", score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, &plain)),
//!     ("dgpu", score_device(vk::PhysicalDeviceType::DISCRETE_GPU, &plain)),
//! ];
//! assert_eq!(pick_best(candidates).map(|(name, _)| name), Some("dgpu"));
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::DEVICE_EXTENSIONS;
use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Score bonus for a discrete GPU.
pub const DISCRETE_GPU_SCORE: u32 = 10_000;
/// Score bonus for an integrated GPU.
pub const INTEGRATED_GPU_SCORE: u32 = 5_000;
/// Score bonus for geometry shader support.
pub const GEOMETRY_SHADER_SCORE: u32 = 100;

/// Queue family indices used for rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// True when graphics and present come from the same family.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.is_complete() && self.graphics_family == self.present_family
    }

    /// Unique queue family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);

        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }

        families
    }
}

/// Picks queue families from per-family capabilities.
///
/// A family that can both render and present is preferred. Otherwise the
/// first graphics family and the first present family are used separately.
pub fn pick_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = supports_present(i);

        if graphics && present {
            return QueueFamilyIndices {
                graphics_family: Some(i),
                present_family: Some(i),
            };
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

/// Information about a physical device (GPU).
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }

    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    pub fn score(&self) -> u32 {
        score_device(self.properties.device_type, &self.features)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Deterministic device score.
///
/// Discrete GPUs get [`DISCRETE_GPU_SCORE`], integrated GPUs
/// [`INTEGRATED_GPU_SCORE`], and geometry shader support adds
/// [`GEOMETRY_SHADER_SCORE`]. A score of zero means "do not use".
pub fn score_device(device_type: vk::PhysicalDeviceType, features: &vk::PhysicalDeviceFeatures) -> u32 {
    let mut score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => DISCRETE_GPU_SCORE,
        vk::PhysicalDeviceType::INTEGRATED_GPU => INTEGRATED_GPU_SCORE,
        _ => 0,
    };

    if features.geometry_shader == vk::TRUE {
        score += GEOMETRY_SHADER_SCORE;
    }

    score
}

/// Returns the candidate with the highest positive score.
///
/// Ties go to the earliest candidate so the choice is stable across runs.
pub fn pick_best<T>(candidates: impl IntoIterator<Item = (T, u32)>) -> Option<(T, u32)> {
    candidates
        .into_iter()
        .filter(|(_, score)| *score > 0)
        .fold(None, |best, (candidate, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((candidate, score)),
        })
}

/// Why a device was not considered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    MissingExtension,
    InadequateSwapchain,
    QueueFamilies,
    ZeroScore,
}

/// Maps the rejections of every enumerated device to the selection error.
///
/// Only when every device failed on queue families is the failure reported
/// as [`RhiError::QueueFamilyUnsupported`].
pub fn selection_error(rejections: &[Rejection]) -> RhiError {
    if !rejections.is_empty() && rejections.iter().all(|r| *r == Rejection::QueueFamilies) {
        RhiError::QueueFamilyUnsupported
    } else {
        RhiError::NoSuitableDevice
    }
}

/// Selects the most suitable physical device for rendering to `surface`.
///
/// # Errors
///
/// [`RhiError::NoSuitableDevice`] if nothing qualifies, or
/// [`RhiError::QueueFamilyUnsupported`] if every GPU lacked a usable
/// graphics/present queue family.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableDevice);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut candidates = Vec::with_capacity(devices.len());
    let mut rejections = Vec::new();

    for device in devices {
        match check_device_suitability(instance, device, surface, surface_loader)? {
            Ok(info) => {
                let score = info.score();
                debug!(
                    "GPU '{}' ({}) - Score: {}",
                    info.device_name(),
                    info.device_type_name(),
                    score
                );
                if score == 0 {
                    rejections.push(Rejection::ZeroScore);
                }
                candidates.push((info, score));
            }
            Err(rejection) => rejections.push(rejection),
        }
    }

    let Some((selected, score)) = pick_best(candidates) else {
        warn!("No suitable GPU found ({:?})", rejections);
        return Err(selection_error(&rejections));
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        score
    );
    if !selected.queue_families.is_shared() {
        info!(
            "Graphics and present use separate queue families {:?}",
            selected.queue_families.unique_families()
        );
    }

    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<Result<PhysicalDeviceInfo, Rejection>> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .unwrap_or(c"Unknown")
        .to_string_lossy();

    if !supports_device_extensions(instance, device)? {
        debug!("GPU '{}' skipped: missing required device extensions", name);
        return Ok(Err(Rejection::MissingExtension));
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let queue_families = pick_queue_families(&families, |i| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, i, surface)
            .unwrap_or(false)
    });
    if !queue_families.is_complete() {
        debug!(
            "GPU '{}' skipped: missing queue families (graphics={}, present={})",
            name,
            queue_families.graphics_family.is_some(),
            queue_families.present_family.is_some()
        );
        return Ok(Err(Rejection::QueueFamilies));
    }

    let support = SwapchainSupportDetails::query(device, surface, surface_loader)?;
    if !support.is_adequate() {
        debug!("GPU '{}' skipped: no surface formats or present modes", name);
        return Ok(Err(Rejection::InadequateSwapchain));
    }

    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    Ok(Ok(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
    }))
}

fn supports_device_extensions(instance: &ash::Instance, device: vk::PhysicalDevice) -> RhiResult<bool> {
    let available = unsafe { instance.enumerate_device_extension_properties(device)? };
    let names: Vec<&CStr> = available
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .collect();

    Ok(DEVICE_EXTENSIONS.iter().all(|required| names.contains(required)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn features(geometry_shader: bool) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures {
            geometry_shader: geometry_shader as vk::Bool32,
            ..Default::default()
        }
    }

    #[test]
    fn test_score_weights() {
        assert_eq!(
            score_device(vk::PhysicalDeviceType::DISCRETE_GPU, &features(false)),
            10_000
        );
        assert_eq!(
            score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, &features(true)),
            5_100
        );
        assert_eq!(score_device(vk::PhysicalDeviceType::CPU, &features(false)), 0);
        assert_eq!(score_device(vk::PhysicalDeviceType::CPU, &features(true)), 100);
    }

    #[test]
    fn test_discrete_beats_integrated_in_any_order() {
        let discrete = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, &features(true));
        let integrated = score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, &features(true));

        let (chosen, _) = pick_best([("integrated", integrated), ("discrete", discrete)]).unwrap();
        assert_eq!(chosen, "discrete");
        let (chosen, _) = pick_best([("discrete", discrete), ("integrated", integrated)]).unwrap();
        assert_eq!(chosen, "discrete");
    }

    #[test]
    fn test_discrete_beats_cpu() {
        let cpu = score_device(vk::PhysicalDeviceType::CPU, &features(true));
        let discrete = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, &features(false));

        let (chosen, score) = pick_best([("cpu", cpu), ("discrete", discrete)]).unwrap();
        assert_eq!(chosen, "discrete");
        assert_eq!(score, 10_000);
    }

    #[test]
    fn test_zero_scores_never_selected() {
        assert!(pick_best([("cpu", 0), ("other", 0)]).is_none());
        assert!(pick_best(Vec::<(&str, u32)>::new()).is_none());
    }

    #[test]
    fn test_ties_keep_first() {
        let (chosen, _) = pick_best([("a", 5_000), ("b", 5_000)]).unwrap();
        assert_eq!(chosen, "a");
    }

    #[test]
    fn test_shared_family_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = pick_queue_families(&families, |i| i != 0);

        assert_eq!(indices.graphics_family, Some(2));
        assert_eq!(indices.present_family, Some(2));
        assert!(indices.is_shared());
        assert_eq!(indices.unique_families(), vec![2]);
    }

    #[test]
    fn test_distinct_families_deduplicated() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = pick_queue_families(&families, |i| i == 1);

        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
        assert!(indices.is_complete());
        assert!(!indices.is_shared());
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn test_no_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = pick_queue_families(&families, |_| false);
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_empty_families_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = pick_queue_families(&families, |_| true);
        assert_eq!(indices.graphics_family, Some(1));
    }

    #[test]
    fn test_selection_error_kind() {
        assert!(matches!(
            selection_error(&[Rejection::QueueFamilies, Rejection::QueueFamilies]),
            RhiError::QueueFamilyUnsupported
        ));
        assert!(matches!(
            selection_error(&[Rejection::QueueFamilies, Rejection::MissingExtension]),
            RhiError::NoSuitableDevice
        ));
        assert!(matches!(selection_error(&[]), RhiError::NoSuitableDevice));
    }
}
