//! D-Bus proxies for the NetworkManager API subset the harness consumes

use std::collections::HashMap;

use zbus::dbus_proxy;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};

pub use active_connection::ActiveConnectionProxy;
pub use device::DeviceProxy;

pub const NM_SERVICE: &str = "org.freedesktop.NetworkManager";

#[dbus_proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
trait NetworkManager {
    fn get_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    /// Returns the new profile and the new active connection
    fn add_and_activate_connection(
        &self,
        connection: HashMap<&str, HashMap<&str, Value<'_>>>,
        device: &ObjectPath<'_>,
        specific_object: &ObjectPath<'_>,
    ) -> zbus::Result<(OwnedObjectPath, OwnedObjectPath)>;

    fn deactivate_connection(&self, active_connection: &ObjectPath<'_>) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn device_added(&self, device_path: ObjectPath<'_>) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn device_removed(&self, device_path: ObjectPath<'_>) -> zbus::Result<()>;

    #[dbus_proxy(property)]
    fn networking_enabled(&self) -> zbus::Result<bool>;

    #[dbus_proxy(property)]
    fn version(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn active_connections(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

/// `StateChanged` is declared by two interfaces, so each lives in its own
/// module to keep the generated signal types apart
pub mod device {
    use super::*;

    #[dbus_proxy(
        interface = "org.freedesktop.NetworkManager.Device",
        default_service = "org.freedesktop.NetworkManager"
    )]
    trait Device {
        #[dbus_proxy(signal)]
        fn state_changed(&self, new_state: u32, old_state: u32, reason: u32) -> zbus::Result<()>;

        #[dbus_proxy(property)]
        fn interface(&self) -> zbus::Result<String>;

        #[dbus_proxy(property)]
        fn driver(&self) -> zbus::Result<String>;

        #[dbus_proxy(property)]
        fn device_type(&self) -> zbus::Result<u32>;

        #[dbus_proxy(property(emits_changed_signal = "false"))]
        fn state(&self) -> zbus::Result<u32>;

        #[dbus_proxy(property)]
        fn managed(&self) -> zbus::Result<bool>;

        #[dbus_proxy(property)]
        fn firmware_missing(&self) -> zbus::Result<bool>;

        #[dbus_proxy(property)]
        fn udi(&self) -> zbus::Result<String>;

        #[dbus_proxy(property)]
        fn hw_address(&self) -> zbus::Result<String>;

        #[dbus_proxy(property)]
        fn available_connections(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
    }
}

#[dbus_proxy(
    interface = "org.freedesktop.NetworkManager.Device.Wireless",
    default_service = "org.freedesktop.NetworkManager"
)]
trait Wireless {
    fn get_all_access_points(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    #[dbus_proxy(signal)]
    fn access_point_added(&self, access_point: ObjectPath<'_>) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn access_point_removed(&self, access_point: ObjectPath<'_>) -> zbus::Result<()>;

    #[dbus_proxy(property)]
    fn active_access_point(&self) -> zbus::Result<OwnedObjectPath>;
}

#[dbus_proxy(
    interface = "org.freedesktop.NetworkManager.AccessPoint",
    default_service = "org.freedesktop.NetworkManager"
)]
trait AccessPoint {
    #[dbus_proxy(property)]
    fn ssid(&self) -> zbus::Result<Vec<u8>>;

    #[dbus_proxy(property)]
    fn max_bitrate(&self) -> zbus::Result<u32>;

    #[dbus_proxy(property)]
    fn mode(&self) -> zbus::Result<u32>;

    #[dbus_proxy(property)]
    fn hw_address(&self) -> zbus::Result<String>;
}

pub mod active_connection {
    use super::*;

    #[dbus_proxy(
        interface = "org.freedesktop.NetworkManager.Connection.Active",
        default_service = "org.freedesktop.NetworkManager"
    )]
    trait ActiveConnection {
        #[dbus_proxy(signal)]
        fn state_changed(&self, state: u32, reason: u32) -> zbus::Result<()>;

        #[dbus_proxy(property)]
        fn id(&self) -> zbus::Result<String>;

        #[dbus_proxy(property)]
        fn uuid(&self) -> zbus::Result<String>;

        #[dbus_proxy(property)]
        fn connection(&self) -> zbus::Result<OwnedObjectPath>;

        #[dbus_proxy(property(emits_changed_signal = "false"))]
        fn state(&self) -> zbus::Result<u32>;

        #[dbus_proxy(property)]
        fn devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
    }
}

#[dbus_proxy(
    interface = "org.freedesktop.NetworkManager.Settings.Connection",
    default_service = "org.freedesktop.NetworkManager"
)]
trait SettingsConnection {
    fn get_settings(&self) -> zbus::Result<HashMap<String, HashMap<String, OwnedValue>>>;
}
