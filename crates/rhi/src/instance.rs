//! Vulkan instance management.
//!
//! Validation output reaches `tracing` through a debug messenger that lives
//! exactly as long as the instance.

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, trace, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with optional validation layer support.
///
/// The debug messenger exists iff validation was requested. Dropping the
/// instance tears the messenger down first.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// `window_extensions` are the instance extensions the window system
    /// needs for surface creation.
    ///
    /// # Errors
    ///
    /// - [`RhiError::Loading`] if the Vulkan loader is missing
    /// - [`RhiError::ValidationUnavailable`] if validation is requested but the
    ///   Khronos layer is not installed
    /// - [`RhiError::ExtensionUnsupported`] if the driver rejects an extension
    pub fn new(window_extensions: &[*const c_char], enable_validation: bool) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        if enable_validation && !Self::is_validation_layer_available(&entry)? {
            error!("Validation layer requested but {VALIDATION_LAYER_NAME:?} is not installed");
            return Err(RhiError::ValidationUnavailable);
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"wrap")
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"wrap_engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let extensions = required_extensions(window_extensions, enable_validation);
        let layers = if enable_validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers)
            .flags(instance_create_flags());

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(|e| match e {
                    vk::Result::ERROR_EXTENSION_NOT_PRESENT => RhiError::ExtensionUnsupported(
                        "instance extension required by the window system".into(),
                    ),
                    other => RhiError::from(other),
                })?
        };

        info!(
            "Vulkan instance created (API 1.3, {} extensions)",
            extensions.len()
        );

        let (debug_utils, debug_messenger) = if enable_validation {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = match Self::setup_debug_messenger(&debug_utils) {
                Ok(m) => m,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };
            info!("Validation layers enabled");
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether the debug messenger is active.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        let found = available_layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        });

        Ok(found)
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        debug!("Debug messenger registered");
        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Window-system extensions plus debug utils and, on macOS, portability
/// enumeration. Duplicates are removed, preserving first occurrence.
fn required_extensions(
    window_extensions: &[*const c_char],
    enable_validation: bool,
) -> Vec<*const c_char> {
    let mut extensions: Vec<*const c_char> = Vec::with_capacity(window_extensions.len() + 3);

    let mut push = |ext: *const c_char| {
        let name = unsafe { CStr::from_ptr(ext) };
        if !extensions
            .iter()
            .any(|&e| unsafe { CStr::from_ptr(e) } == name)
        {
            extensions.push(ext);
        }
    };

    for &ext in window_extensions {
        push(ext);
    }
    if enable_validation {
        push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[cfg(target_os = "macos")]
    {
        push(ash::khr::portability_enumeration::NAME.as_ptr());
        push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
    }

    extensions
}

fn instance_create_flags() -> vk::InstanceCreateFlags {
    if cfg!(target_os = "macos") {
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    }
}

/// Forwards validation layer messages to `tracing` by severity.
///
/// # Safety
///
/// Called by the Vulkan loader; `p_callback_data` must be null or valid for
/// the duration of the call.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[Vulkan {type_str}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("[Vulkan {type_str}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!("[Vulkan {type_str}] {message}"),
        _ => trace!("[Vulkan {type_str}] {message}"),
    }

    vk::FALSE
}
