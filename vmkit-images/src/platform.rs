/// Platform gates for image sources.
///
/// Kept as free functions so the registry and the vaults share one answer.

/// Whether a named remote catalog is usable on this platform.
pub fn is_remote_supported(remote: &str) -> bool {
    #[cfg(target_os = "linux")]
    {
        let _ = remote;
        true
    }
    #[cfg(not(target_os = "linux"))]
    {
        // Only the stable release stream is vetted elsewhere.
        matches!(remote, "release")
    }
}

/// Whether http/file image URLs can be used as image sources here.
pub fn is_image_url_supported() -> bool {
    cfg!(target_os = "linux")
}
