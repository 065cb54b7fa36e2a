// Ephemeral preview handles for staged images
// Every handle must be revoked explicitly once superseded or torn down

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use super::types::ImageBlob;

/// `blob:<uuid>` handle bound to one image
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewUrl(String);

impl PreviewUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PreviewUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
pub struct PreviewRegistry {
    live: Mutex<HashMap<String, ImageBlob>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, blob: &ImageBlob) -> PreviewUrl {
        let url = format!("blob:{}", uuid::Uuid::new_v4());
        self.lock().insert(url.clone(), blob.clone());
        log::debug!("Created preview {} for {}", url, blob.name);
        PreviewUrl(url)
    }

    /// Returns false if the handle was already revoked
    pub fn revoke(&self, url: &PreviewUrl) -> bool {
        let removed = self.lock().remove(url.as_str()).is_some();
        if removed {
            log::debug!("Revoked preview {}", url);
        }
        removed
    }

    pub fn revoke_all(&self) -> usize {
        let mut live = self.lock();
        let count = live.len();
        live.clear();
        count
    }

    pub fn resolve(&self, url: &str) -> Option<ImageBlob> {
        self.lock().get(url).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ImageBlob>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_resolve_revoke() {
        let registry = PreviewRegistry::new();
        let blob = ImageBlob::new("leaf.png", "image/png", vec![1u8, 2, 3]);

        let url = registry.create(&blob);
        assert!(url.as_str().starts_with("blob:"));
        assert_eq!(registry.resolve(url.as_str()), Some(blob));
        assert_eq!(registry.live_count(), 1);

        assert!(registry.revoke(&url));
        assert!(!registry.revoke(&url));
        assert_eq!(registry.live_count(), 0);
        assert!(registry.resolve(url.as_str()).is_none());
    }

    #[test]
    fn test_revoke_all() {
        let registry = PreviewRegistry::new();
        let blob = ImageBlob::new("a.jpg", "image/jpeg", vec![0u8]);
        let first = registry.create(&blob);
        let second = registry.create(&blob);
        assert_ne!(first, second);

        assert_eq!(registry.revoke_all(), 2);
        assert_eq!(registry.live_count(), 0);
    }
}
