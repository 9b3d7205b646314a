//! Device table and connection registry.
//!
//! The [`DeviceTable`] is the static allow-list loaded from configuration:
//! every device the server will ever talk to, keyed by MAC address.
//!
//! The [`ConnectionRegistry`] tracks which of those devices currently has a
//! live link.  Every configured device is in exactly one of two sets:
//!
//! ```text
//!                 set_connected
//!  disconnected  ───────────────►  connected(link)
//!       ▲                               │
//!       └───────────────────────────────┘
//!                set_disconnected
//! ```
//!
//! All operations take one mutex for the whole registry and never perform
//! I/O while holding it.  Links are cloned out and used after the lock is
//! released; closing a link is always the caller's job.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use ledwall_core::{Device, MacAddress};

/// Outbound half of a device connection.
///
/// The TCP implementation lives in `infrastructure::network`; tests use
/// recording doubles.  Clones refer to the same underlying connection.
#[async_trait]
pub trait DeviceLink: Clone + Send + Sync + 'static {
    /// Writes all of `bytes`.  A short write is reported as an error.
    async fn send(&self, bytes: &[u8]) -> io::Result<()>;

    /// Shuts the connection down.  Calling it twice is harmless.
    async fn close(&self);

    /// `true` if both handles refer to the same connection.
    fn same_link(&self, other: &Self) -> bool;

    /// Remote address for log messages.
    fn peer(&self) -> String;
}

// ── DeviceTable ───────────────────────────────────────────────────────────────

/// Immutable set of configured devices, keyed by MAC address.
#[derive(Debug, Clone, Default)]
pub struct DeviceTable {
    devices: BTreeMap<MacAddress, Device>,
}

impl DeviceTable {
    /// Builds the table; a later device with a repeated MAC replaces the
    /// earlier one.  Configuration validation rejects duplicates beforehand.
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Self {
        Self {
            devices: devices.into_iter().map(|d| (d.mac, d)).collect(),
        }
    }

    pub fn get(&self, mac: &MacAddress) -> Option<&Device> {
        self.devices.get(mac)
    }

    pub fn contains(&self, mac: &MacAddress) -> bool {
        self.devices.contains_key(mac)
    }

    pub fn macs(&self) -> impl Iterator<Item = MacAddress> + '_ {
        self.devices.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

// ── ConnectionRegistry ────────────────────────────────────────────────────────

struct RegistryState<L> {
    connected: BTreeMap<MacAddress, L>,
    disconnected: BTreeSet<MacAddress>,
}

/// Thread-safe map from device to its live link, or to "disconnected".
///
/// Only devices passed to [`ConnectionRegistry::new`] are tracked; every
/// operation on an unknown MAC is a no-op.
pub struct ConnectionRegistry<L> {
    state: Mutex<RegistryState<L>>,
}

impl<L: DeviceLink> ConnectionRegistry<L> {
    /// Creates a registry with every device initially disconnected.
    pub fn new(macs: impl IntoIterator<Item = MacAddress>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                connected: BTreeMap::new(),
                disconnected: macs.into_iter().collect(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<L>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `mac` connected through `link`.
    ///
    /// Returns `false` without changing anything if the device is unknown or
    /// already connected; the caller still owns `link` and must close it.
    pub fn set_connected(&self, mac: MacAddress, link: L) -> bool {
        let mut state = self.lock();
        if !state.disconnected.remove(&mac) {
            return false;
        }
        state.connected.insert(mac, link);
        true
    }

    /// Marks `mac` disconnected, returning the link it held so the caller
    /// can close it.
    pub fn set_disconnected(&self, mac: MacAddress) -> Option<L> {
        let mut state = self.lock();
        let link = state.connected.remove(&mac)?;
        state.disconnected.insert(mac);
        Some(link)
    }

    /// Marks `mac` disconnected only if it is still connected through
    /// `link`, so that a stale failure never demotes a newer connection of
    /// the same device.
    pub fn set_disconnected_if_current(&self, mac: MacAddress, link: &L) -> Option<L> {
        let mut state = self.lock();
        if !state.connected.get(&mac).is_some_and(|l| l.same_link(link)) {
            return None;
        }
        let link = state.connected.remove(&mac)?;
        state.disconnected.insert(mac);
        Some(link)
    }

    /// Returns a clone of the live link for `mac`, if connected.
    pub fn get_socket(&self, mac: &MacAddress) -> Option<L> {
        self.lock().connected.get(mac).cloned()
    }

    pub fn is_connected(&self, mac: &MacAddress) -> bool {
        self.lock().connected.contains_key(mac)
    }

    /// Snapshot of every connected device and its link, in MAC order.
    pub fn all_connected(&self) -> Vec<(MacAddress, L)> {
        self.lock()
            .connected
            .iter()
            .map(|(mac, link)| (*mac, link.clone()))
            .collect()
    }

    /// Snapshot of every disconnected device, in MAC order.
    pub fn all_disconnected(&self) -> Vec<MacAddress> {
        self.lock().disconnected.iter().copied().collect()
    }

    /// Disconnects every device, returning the links that were live.
    pub fn disconnect_all(&self) -> Vec<(MacAddress, L)> {
        let mut state = self.lock();
        let links = std::mem::take(&mut state.connected);
        state.disconnected.extend(links.keys().copied());
        links.into_iter().collect()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingLink;
    use super::*;

    fn mac(n: u8) -> MacAddress {
        MacAddress::new([0, 0, 0, 0, 0, n])
    }

    fn registry(n: u8) -> ConnectionRegistry<RecordingLink> {
        ConnectionRegistry::new((1..=n).map(mac))
    }

    fn assert_exclusive(reg: &ConnectionRegistry<RecordingLink>, macs: &[MacAddress]) {
        let connected: Vec<_> = reg.all_connected().into_iter().map(|(m, _)| m).collect();
        let disconnected = reg.all_disconnected();
        for m in macs {
            let c = connected.contains(m);
            let d = disconnected.contains(m);
            assert!(c ^ d, "{m} must be in exactly one set (connected={c}, disconnected={d})");
        }
    }

    #[test]
    fn test_registry_starts_with_every_device_disconnected() {
        let reg = registry(3);
        assert!(reg.all_connected().is_empty());
        assert_eq!(reg.all_disconnected(), vec![mac(1), mac(2), mac(3)]);
    }

    #[test]
    fn test_set_connected_moves_device_between_sets() {
        let reg = registry(2);
        assert!(reg.set_connected(mac(1), RecordingLink::new()));

        assert!(reg.is_connected(&mac(1)));
        assert_eq!(reg.all_disconnected(), vec![mac(2)]);
        assert_exclusive(&reg, &[mac(1), mac(2)]);
    }

    #[test]
    fn test_set_connected_is_noop_when_already_connected() {
        // Arrange
        let reg = registry(1);
        let first = RecordingLink::new();
        let second = RecordingLink::new();
        assert!(reg.set_connected(mac(1), first.clone()));

        // Act
        let accepted = reg.set_connected(mac(1), second);

        // Assert
        assert!(!accepted);
        let live = reg.get_socket(&mac(1)).unwrap();
        assert!(live.same_link(&first));
    }

    #[test]
    fn test_set_connected_rejects_unknown_device() {
        let reg = registry(1);
        assert!(!reg.set_connected(mac(9), RecordingLink::new()));
        assert!(reg.get_socket(&mac(9)).is_none());
        assert!(!reg.all_disconnected().contains(&mac(9)));
    }

    #[test]
    fn test_set_disconnected_returns_link_without_closing_it() {
        let reg = registry(1);
        let link = RecordingLink::new();
        reg.set_connected(mac(1), link.clone());

        let removed = reg.set_disconnected(mac(1)).unwrap();

        assert!(removed.same_link(&link));
        assert!(!link.is_closed(), "the registry never closes links itself");
        assert_eq!(reg.all_disconnected(), vec![mac(1)]);
        assert!(reg.set_disconnected(mac(1)).is_none());
    }

    #[test]
    fn test_rapid_reconnect_leaves_exactly_one_live_link() {
        // Arrange
        let reg = registry(1);
        let old = RecordingLink::new();
        reg.set_connected(mac(1), old.clone());

        // Act: the handshake path takes the old link out before registering.
        let new = RecordingLink::new();
        if let Some(stale) = reg.set_disconnected(mac(1)) {
            tokio_test::block_on(stale.close());
        }
        assert!(reg.set_connected(mac(1), new.clone()));

        // Assert
        assert!(old.is_closed());
        assert!(!new.is_closed());
        let connected = reg.all_connected();
        assert_eq!(connected.len(), 1);
        assert!(connected[0].1.same_link(&new));
        assert_exclusive(&reg, &[mac(1)]);
    }

    #[test]
    fn test_set_disconnected_if_current_ignores_newer_link() {
        let reg = registry(1);
        let old = RecordingLink::new();
        let new = RecordingLink::new();
        reg.set_connected(mac(1), new.clone());

        assert!(reg.set_disconnected_if_current(mac(1), &old).is_none());
        assert!(reg.is_connected(&mac(1)));

        assert!(reg.set_disconnected_if_current(mac(1), &new).is_some());
        assert!(!reg.is_connected(&mac(1)));
    }

    #[test]
    fn test_snapshot_is_independent_of_later_mutation() {
        let reg = registry(2);
        reg.set_connected(mac(1), RecordingLink::new());
        reg.set_connected(mac(2), RecordingLink::new());

        let snapshot = reg.all_connected();
        reg.set_disconnected(mac(1));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(reg.all_connected().len(), 1);
    }

    #[test]
    fn test_disconnect_all_empties_connected_set() {
        let reg = registry(3);
        reg.set_connected(mac(1), RecordingLink::new());
        reg.set_connected(mac(3), RecordingLink::new());

        let links = reg.disconnect_all();

        assert_eq!(links.len(), 2);
        assert!(reg.all_connected().is_empty());
        assert_eq!(reg.all_disconnected().len(), 3);
    }

    #[test]
    fn test_concurrent_set_connected_admits_one_link() {
        use std::sync::Arc;

        let reg = Arc::new(registry(1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || reg.set_connected(mac(1), RecordingLink::new()))
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 1);
        assert_exclusive(&reg, &[mac(1)]);
    }

    #[test]
    fn test_device_table_lookup_by_mac() {
        use ledwall_core::protocol::ColorOrder;

        let table = DeviceTable::new(vec![Device {
            mac: mac(7),
            name: "panel-7".to_string(),
            channel_order: ColorOrder::Rgb,
            pins: vec![],
        }]);
        assert!(table.contains(&mac(7)));
        assert_eq!(table.get(&mac(7)).unwrap().name, "panel-7");
        assert!(table.get(&mac(8)).is_none());
        assert_eq!(table.len(), 1);
    }
}
