//! In-memory set of discovered transports, deduplicated by handle.

use crate::model::DeviceCategory;
use crate::transport::HandleId;

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub category: DeviceCategory,
    pub handle: HandleId,
    pub name: String,
    pub rssi: Option<i16>,
    pub connected: bool,
    pub physical_address: Option<String>,
}

/// Discovered transports for the current scan/connect session. Entries are
/// evicted on disconnect unless they are the active reconnect target, so a
/// follow-up `connect` can still match them.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Vec<RegistryEntry>,
}

impl ConnectionRegistry {
    /// Insert or refresh an entry. Returns true when the handle was new.
    pub fn register(&mut self, entry: RegistryEntry) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.handle == entry.handle) {
            existing.rssi = entry.rssi;
            existing.name = entry.name;
            existing.category = entry.category;
            if entry.physical_address.is_some() {
                existing.physical_address = entry.physical_address;
            }
            false
        } else {
            self.entries.push(entry);
            true
        }
    }

    pub fn get(&self, handle: &HandleId) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| &e.handle == handle)
    }

    pub fn category_of(&self, handle: &HandleId) -> Option<DeviceCategory> {
        self.get(handle).map(|e| e.category)
    }

    pub fn mark_connected(&mut self, handle: &HandleId, connected: bool) {
        if let Some(entry) = self.entries.iter_mut().find(|e| &e.handle == handle) {
            entry.connected = connected;
        }
    }

    /// First entry for a category; at most one is expected per category by
    /// construction of the classifier.
    pub fn first_for_category(&self, category: DeviceCategory) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.category == category)
    }

    pub fn connected_handle(&self, category: DeviceCategory) -> Option<&HandleId> {
        self.entries
            .iter()
            .find(|e| e.category == category && e.connected)
            .map(|e| &e.handle)
    }

    pub fn is_connected(&self, category: DeviceCategory) -> bool {
        self.connected_handle(category).is_some()
    }

    pub fn evict(&mut self, handle: &HandleId) {
        self.entries.retain(|e| &e.handle != handle);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(handle: &str, category: DeviceCategory, rssi: i16) -> RegistryEntry {
        RegistryEntry {
            category,
            handle: handle.to_string(),
            name: format!("dev-{}", handle),
            rssi: Some(rssi),
            connected: false,
            physical_address: None,
        }
    }

    #[test]
    fn register_dedupes_by_handle_and_refreshes_rssi() {
        let mut registry = ConnectionRegistry::default();
        assert!(registry.register(entry("h1", DeviceCategory::Scale, -70)));
        assert!(!registry.register(entry("h1", DeviceCategory::Scale, -55)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&"h1".to_string()).unwrap().rssi, Some(-55));
    }

    #[test]
    fn connected_lookup_requires_connected_flag() {
        let mut registry = ConnectionRegistry::default();
        registry.register(entry("h1", DeviceCategory::JumpRope, -50));
        assert!(!registry.is_connected(DeviceCategory::JumpRope));

        registry.mark_connected(&"h1".to_string(), true);
        assert_eq!(
            registry.connected_handle(DeviceCategory::JumpRope),
            Some(&"h1".to_string())
        );
    }

    #[test]
    fn evict_removes_only_the_named_handle() {
        let mut registry = ConnectionRegistry::default();
        registry.register(entry("h1", DeviceCategory::JumpRope, -50));
        registry.register(entry("h2", DeviceCategory::Scale, -60));

        registry.evict(&"h1".to_string());
        assert_eq!(registry.len(), 1);
        assert!(registry.first_for_category(DeviceCategory::Scale).is_some());
    }
}
