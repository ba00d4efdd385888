//! NetworkManager backend over D-Bus
//!
//! State is read through proxies on demand. Changes are watched by
//! background tasks, one set per daemon object, which translate D-Bus
//! signals and property changes into [`Notification`]s on a channel. The
//! tasks only forward; all interpretation happens in the client's snapshot.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::{Connection, ConnectionBuilder, PropertyStream};

use super::proxies::active_connection::StateChangedStream as SessionStateChangedStream;
use super::proxies::device::StateChangedStream as DeviceStateChangedStream;
use super::proxies::{
    AccessPointAddedStream, AccessPointProxy, AccessPointRemovedStream, ActiveConnectionProxy,
    DeviceProxy, NetworkManagerProxy, SettingsConnectionProxy, WirelessProxy, NM_SERVICE,
};
use super::{
    AccessPointInfo, ActivationRequest, CancelSignal, DeviceInfo, DeviceKind, DeviceState,
    NetworkService, Notification, ObjectId, PeerMode, ServiceError, SessionInfo, SessionState,
    Snapshot,
};
use crate::profile::{ConnectionProfile, SettingValue, SettingsMap};

fn object_id(path: &OwnedObjectPath) -> ObjectId {
    ObjectId::new(path.as_str())
}

fn object_path(id: &ObjectId) -> Result<ObjectPath<'_>, ServiceError> {
    ObjectPath::try_from(id.as_str())
        .map_err(|e| ServiceError::Bus(format!("invalid object path '{}': {}", id, e)))
}

/// State shared between the service handle and its watcher tasks
struct Shared {
    conn: Connection,
    tx: mpsc::UnboundedSender<Notification>,
    /// Watcher tasks per daemon object, aborted when the object goes away
    watchers: Mutex<HashMap<ObjectId, Vec<JoinHandle<()>>>>,
    /// Active sessions announced so far
    sessions: Mutex<BTreeSet<ObjectId>>,
}

impl Shared {
    fn emit(&self, notification: Notification) {
        // Receiver gone means the client is shutting down
        let _ = self.tx.send(notification);
    }

    fn track(&self, id: &ObjectId, handle: JoinHandle<()>) {
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.entry(id.clone()).or_default().push(handle);
        }
    }

    fn forget(&self, id: &ObjectId) {
        if let Ok(mut watchers) = self.watchers.lock() {
            for handle in watchers.remove(id).unwrap_or_default() {
                handle.abort();
            }
        }
    }

    fn abort_all(&self) {
        if let Ok(mut watchers) = self.watchers.lock() {
            for (_, handles) in watchers.drain() {
                for handle in handles {
                    handle.abort();
                }
            }
        }
    }

    async fn device_proxy(&self, path: &ObjectPath<'_>) -> zbus::Result<DeviceProxy<'static>> {
        DeviceProxy::builder(&self.conn)
            .path(path.as_str().to_owned())?
            .build()
            .await
    }

    async fn wireless_proxy(&self, path: &ObjectPath<'_>) -> zbus::Result<WirelessProxy<'static>> {
        WirelessProxy::builder(&self.conn)
            .path(path.as_str().to_owned())?
            .build()
            .await
    }

    async fn session_proxy(
        &self,
        path: &ObjectPath<'_>,
    ) -> zbus::Result<ActiveConnectionProxy<'static>> {
        ActiveConnectionProxy::builder(&self.conn)
            .path(path.as_str().to_owned())?
            .build()
            .await
    }

    async fn read_access_point(&self, path: &ObjectPath<'_>) -> zbus::Result<AccessPointInfo> {
        let proxy = AccessPointProxy::builder(&self.conn)
            .path(path.as_str().to_owned())?
            .build()
            .await?;
        Ok(AccessPointInfo {
            id: ObjectId::new(path.as_str()),
            ssid: proxy.ssid().await?,
            max_bitrate: proxy.max_bitrate().await?,
            mode: PeerMode::from_raw(proxy.mode().await?),
            hw_address: proxy.hw_address().await?,
        })
    }

    async fn read_device(
        &self,
        path: &ObjectPath<'_>,
    ) -> zbus::Result<(DeviceInfo, Vec<AccessPointInfo>)> {
        let proxy = self.device_proxy(path).await?;
        let kind = DeviceKind::from_raw(proxy.device_type().await?);

        let mut access_points = Vec::new();
        let mut active_access_point = None;
        if kind == DeviceKind::Wifi {
            let wireless = self.wireless_proxy(path).await?;
            for ap in wireless.get_all_access_points().await? {
                // An access point can vanish between listing and reading
                match self.read_access_point(&ap).await {
                    Ok(info) => access_points.push(info),
                    Err(e) => tracing::debug!(ap = %ap.as_str(), "Skipping access point: {}", e),
                }
            }
            let active = object_id(&wireless.active_access_point().await?);
            active_access_point = (!active.is_null()).then_some(active);
        }

        let device = DeviceInfo {
            id: ObjectId::new(path.as_str()),
            interface: proxy.interface().await?,
            kind,
            driver: proxy.driver().await?,
            hw_address: proxy.hw_address().await?,
            state: DeviceState::from_raw(proxy.state().await?),
            managed: proxy.managed().await?,
            firmware_missing: proxy.firmware_missing().await?,
            udi: proxy.udi().await?,
            access_points: access_points.iter().map(|ap| ap.id.clone()).collect(),
            active_access_point,
            available_profiles: proxy
                .available_connections()
                .await?
                .iter()
                .map(object_id)
                .collect(),
        };
        Ok((device, access_points))
    }

    async fn read_session(&self, path: &ObjectPath<'_>) -> zbus::Result<SessionInfo> {
        let proxy = self.session_proxy(path).await?;
        Ok(SessionInfo {
            id: ObjectId::new(path.as_str()),
            uuid: proxy.uuid().await?,
            name: proxy.id().await?,
            profile: object_id(&proxy.connection().await?),
            state: SessionState::from_raw(proxy.state().await?),
            devices: proxy.devices().await?.iter().map(object_id).collect(),
        })
    }
}

/// Announce a device and everything below it, then forward its changes
async fn add_device(shared: &Arc<Shared>, path: OwnedObjectPath) {
    let announced = async {
        let watch = DeviceWatch::open(shared, &path).await?;
        let (device, access_points) = shared.read_device(&path).await?;
        Ok::<_, zbus::Error>((watch, device, access_points))
    }
    .await;
    match announced {
        Ok((watch, device, access_points)) => {
            let id = device.id.clone();
            shared.emit(Notification::DeviceAdded(device));
            for access_point in access_points {
                shared.emit(Notification::AccessPointAdded {
                    device: id.clone(),
                    access_point,
                });
            }
            watch.forward(shared, id);
        }
        Err(e) => tracing::warn!(device = %path.as_str(), "Could not read device: {}", e),
    }
}

async fn add_session(shared: &Arc<Shared>, path: OwnedObjectPath) {
    let announced = async {
        let proxy = shared.session_proxy(&path).await?;
        let changes = proxy.receive_state_changed().await?;
        let session = shared.read_session(&path).await?;
        Ok::<_, zbus::Error>((proxy, changes, session))
    }
    .await;
    match announced {
        Ok((proxy, changes, session)) => {
            let id = session.id.clone();
            shared.emit(Notification::SessionAdded(session));
            forward_session(shared, id, proxy, changes);
        }
        Err(e) => tracing::debug!(session = %path.as_str(), "Could not read session: {}", e),
    }
}

/// Diff the daemon's active connection list against what was announced
async fn sync_sessions(shared: &Arc<Shared>, current: Vec<OwnedObjectPath>) {
    let current_ids: BTreeSet<ObjectId> = current.iter().map(object_id).collect();
    let (added, removed) = match shared.sessions.lock() {
        Ok(mut known) => {
            let added: Vec<OwnedObjectPath> = current
                .into_iter()
                .filter(|p| !known.contains(&object_id(p)))
                .collect();
            let removed: Vec<ObjectId> = known.difference(&current_ids).cloned().collect();
            *known = current_ids;
            (added, removed)
        }
        Err(_) => return,
    };
    for id in removed {
        shared.forget(&id);
        shared.emit(Notification::SessionRemoved(id));
    }
    for path in added {
        add_session(shared, path).await;
    }
}

fn watch_manager(shared: &Arc<Shared>, nm: NetworkManagerProxy<'static>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let s = Arc::clone(shared);
    let proxy = nm.clone();
    handles.push(tokio::spawn(async move {
        let Ok(mut added) = proxy.receive_device_added().await else {
            return;
        };
        while let Some(signal) = added.next().await {
            if let Ok(args) = signal.args() {
                let path = OwnedObjectPath::from(args.device_path().clone());
                tracing::debug!(device = %path.as_str(), "Device added");
                add_device(&s, path).await;
            }
        }
    }));

    let s = Arc::clone(shared);
    let proxy = nm.clone();
    handles.push(tokio::spawn(async move {
        let Ok(mut removed) = proxy.receive_device_removed().await else {
            return;
        };
        while let Some(signal) = removed.next().await {
            if let Ok(args) = signal.args() {
                let id = ObjectId::new(args.device_path().as_str());
                tracing::debug!(device = %id, "Device removed");
                s.forget(&id);
                s.emit(Notification::DeviceRemoved(id));
            }
        }
    }));

    let s = Arc::clone(shared);
    let proxy = nm.clone();
    handles.push(tokio::spawn(async move {
        let mut changes = proxy.receive_networking_enabled_changed().await;
        while let Some(change) = changes.next().await {
            if let Ok(enabled) = change.get().await {
                s.emit(Notification::NetworkingEnabled(enabled));
            }
        }
    }));

    let s = Arc::clone(shared);
    handles.push(tokio::spawn(async move {
        let mut changes = nm.receive_active_connections_changed().await;
        while let Some(change) = changes.next().await {
            if let Ok(current) = change.get().await {
                sync_sessions(&s, current).await;
            }
        }
    }));

    handles
}

/// Change streams of one device
///
/// Opened before the device is read and drained only after it was announced,
/// so a transition between the two reads is still delivered, in order.
struct DeviceWatch {
    device: DeviceProxy<'static>,
    state: DeviceStateChangedStream<'static>,
    profiles: PropertyStream<'static, Vec<OwnedObjectPath>>,
    wireless: Option<WirelessWatch>,
}

struct WirelessWatch {
    proxy: WirelessProxy<'static>,
    active: PropertyStream<'static, OwnedObjectPath>,
    added: AccessPointAddedStream<'static>,
    removed: AccessPointRemovedStream<'static>,
}

impl DeviceWatch {
    async fn open(shared: &Shared, path: &ObjectPath<'_>) -> zbus::Result<Self> {
        let device = shared.device_proxy(path).await?;
        let state = device.receive_state_changed().await?;
        let profiles = device.receive_available_connections_changed().await;
        let wireless = if DeviceKind::from_raw(device.device_type().await?) == DeviceKind::Wifi {
            let proxy = shared.wireless_proxy(path).await?;
            let active = proxy.receive_active_access_point_changed().await;
            let added = proxy.receive_access_point_added().await?;
            let removed = proxy.receive_access_point_removed().await?;
            Some(WirelessWatch {
                proxy,
                active,
                added,
                removed,
            })
        } else {
            None
        };
        Ok(Self {
            device,
            state,
            profiles,
            wireless,
        })
    }

    /// Forward everything received since opening, tracked under `id`
    fn forward(self, shared: &Arc<Shared>, id: ObjectId) {
        let Self {
            device: proxy,
            state: mut changes,
            profiles: mut profile_changes,
            wireless,
        } = self;

        let s = Arc::clone(shared);
        let device = id.clone();
        shared.track(
            &id,
            tokio::spawn(async move {
                let _proxy = proxy;
                while let Some(signal) = changes.next().await {
                    if let Ok(args) = signal.args() {
                        let state = DeviceState::from_raw(*args.new_state());
                        tracing::debug!(device = %device, %state, "Device state changed");
                        s.emit(Notification::DeviceStateChanged {
                            device: device.clone(),
                            state,
                        });
                    }
                }
            }),
        );

        let s = Arc::clone(shared);
        let device = id.clone();
        shared.track(
            &id,
            tokio::spawn(async move {
                while let Some(change) = profile_changes.next().await {
                    if let Ok(profiles) = change.get().await {
                        s.emit(Notification::AvailableProfilesChanged {
                            device: device.clone(),
                            profiles: profiles.iter().map(object_id).collect(),
                        });
                    }
                }
            }),
        );

        let Some(WirelessWatch {
            proxy,
            mut active,
            mut added,
            mut removed,
        }) = wireless
        else {
            return;
        };

        let s = Arc::clone(shared);
        let device = id.clone();
        shared.track(
            &id,
            tokio::spawn(async move {
                while let Some(change) = active.next().await {
                    if let Ok(ap) = change.get().await {
                        let ap = object_id(&ap);
                        s.emit(Notification::ActiveAccessPointChanged {
                            device: device.clone(),
                            access_point: (!ap.is_null()).then_some(ap),
                        });
                    }
                }
            }),
        );

        let s = Arc::clone(shared);
        let device = id.clone();
        shared.track(
            &id,
            tokio::spawn(async move {
                let _proxy = proxy;
                while let Some(signal) = added.next().await {
                    let Ok(args) = signal.args() else { continue };
                    match s.read_access_point(args.access_point()).await {
                        Ok(access_point) => {
                            tracing::debug!(
                                device = %device,
                                ssid = %access_point.ssid_lossy(),
                                "Access point added"
                            );
                            s.emit(Notification::AccessPointAdded {
                                device: device.clone(),
                                access_point,
                            });
                        }
                        Err(e) => tracing::debug!("Could not read new access point: {}", e),
                    }
                }
            }),
        );

        let s = Arc::clone(shared);
        let device = id.clone();
        shared.track(
            &id,
            tokio::spawn(async move {
                while let Some(signal) = removed.next().await {
                    if let Ok(args) = signal.args() {
                        s.emit(Notification::AccessPointRemoved {
                            device: device.clone(),
                            access_point: ObjectId::new(args.access_point().as_str()),
                        });
                    }
                }
            }),
        );
    }
}

fn forward_session(
    shared: &Arc<Shared>,
    id: ObjectId,
    proxy: ActiveConnectionProxy<'static>,
    mut changes: SessionStateChangedStream<'static>,
) {
    let s = Arc::clone(shared);
    let session = id.clone();
    shared.track(
        &id,
        tokio::spawn(async move {
            let _proxy = proxy;
            while let Some(signal) = changes.next().await {
                if let Ok(args) = signal.args() {
                    let state = SessionState::from_raw(*args.state());
                    tracing::debug!(session = %session, %state, "Session state changed");
                    s.emit(Notification::SessionStateChanged {
                        session: session.clone(),
                        state,
                    });
                }
            }
        }),
    );
}

fn to_dbus_value(value: &SettingValue) -> Value<'_> {
    match value {
        SettingValue::Str(s) => Value::from(s.as_str()),
        SettingValue::Int(i) => Value::from(*i as i32),
        SettingValue::Bool(b) => Value::from(*b),
        SettingValue::StrList(list) => {
            Value::from(list.iter().map(String::as_str).collect::<Vec<&str>>())
        }
        SettingValue::Bytes(bytes) => Value::from(bytes.clone()),
    }
}

fn from_dbus_value(value: &Value<'_>) -> Option<SettingValue> {
    match value {
        Value::Str(s) => Some(SettingValue::Str(s.to_string())),
        Value::Bool(b) => Some(SettingValue::Bool(*b)),
        Value::I32(i) => Some(SettingValue::Int(i64::from(*i))),
        Value::U32(u) => Some(SettingValue::Int(i64::from(*u))),
        Value::I64(i) => Some(SettingValue::Int(*i)),
        Value::Array(array) => {
            let items = array.get();
            if items.iter().all(|v| matches!(v, Value::U8(_))) {
                Some(SettingValue::Bytes(
                    items
                        .iter()
                        .filter_map(|v| match v {
                            Value::U8(b) => Some(*b),
                            _ => None,
                        })
                        .collect(),
                ))
            } else if items.iter().all(|v| matches!(v, Value::Str(_))) {
                Some(SettingValue::StrList(
                    items
                        .iter()
                        .filter_map(|v| match v {
                            Value::Str(s) => Some(s.to_string()),
                            _ => None,
                        })
                        .collect(),
                ))
            } else {
                None
            }
        }
        Value::Value(inner) => from_dbus_value(inner),
        _ => None,
    }
}

fn settings_from_dbus(raw: HashMap<String, HashMap<String, OwnedValue>>) -> SettingsMap {
    raw.into_iter()
        .map(|(name, setting)| {
            let setting = setting
                .iter()
                .filter_map(|(key, value)| Some((key.clone(), from_dbus_value(value)?)))
                .collect();
            (name, setting)
        })
        .collect()
}

/// NetworkManager reached over D-Bus
pub struct NmService {
    shared: Arc<Shared>,
    nm: NetworkManagerProxy<'static>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    manager_watchers: Vec<JoinHandle<()>>,
}

impl NmService {
    /// Connect to the daemon
    ///
    /// Uses the system bus unless a private bus address is given.
    pub async fn connect(bus_address: Option<&str>) -> Result<Self, ServiceError> {
        let conn = match bus_address {
            Some(address) => ConnectionBuilder::address(address)?.build().await?,
            None => Connection::system().await?,
        };
        tracing::debug!(service = NM_SERVICE, private_bus = bus_address.is_some(), "Connected");

        let nm = NetworkManagerProxy::new(&conn).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            conn,
            tx,
            watchers: Mutex::new(HashMap::new()),
            sessions: Mutex::new(BTreeSet::new()),
        });

        // Everything is subscribed before the client reads its first
        // snapshot, so no change slips between the two
        let manager_watchers = watch_manager(&shared, nm.clone());
        for path in nm.get_devices().await? {
            let id = object_id(&path);
            DeviceWatch::open(&shared, &path).await?.forward(&shared, id);
        }
        sync_sessions(&shared, nm.active_connections().await?).await;

        Ok(Self {
            shared,
            nm,
            notifications: Mutex::new(Some(rx)),
            manager_watchers,
        })
    }
}

impl Drop for NmService {
    fn drop(&mut self) {
        for handle in &self.manager_watchers {
            handle.abort();
        }
        self.shared.abort_all();
    }
}

#[async_trait]
impl NetworkService for NmService {
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
        self.notifications.lock().ok()?.take()
    }

    async fn snapshot(&self) -> Result<Snapshot, ServiceError> {
        let mut snapshot = Snapshot {
            networking_enabled: self.nm.networking_enabled().await?,
            version: self.nm.version().await?,
            ..Default::default()
        };
        for path in self.nm.get_devices().await? {
            let (device, access_points) = self.shared.read_device(&path).await?;
            snapshot.devices.insert(device.id.clone(), device);
            for ap in access_points {
                snapshot.access_points.insert(ap.id.clone(), ap);
            }
        }
        for path in self.nm.active_connections().await? {
            match self.shared.read_session(&path).await {
                Ok(session) => {
                    snapshot.sessions.insert(session.id.clone(), session);
                }
                // Sessions can disappear while being listed
                Err(e) => tracing::debug!(session = %path.as_str(), "Skipping session: {}", e),
            }
        }
        Ok(snapshot)
    }

    async fn add_and_activate(
        &self,
        request: ActivationRequest,
        mut cancel: CancelSignal,
    ) -> Result<ObjectId, ServiceError> {
        let settings = request.profile.to_settings();
        let connection: HashMap<&str, HashMap<&str, Value<'_>>> = settings
            .iter()
            .map(|(name, setting)| {
                let values = setting
                    .iter()
                    .map(|(key, value)| (key.as_str(), to_dbus_value(value)))
                    .collect();
                (name.as_str(), values)
            })
            .collect();
        let device = object_path(&request.device)?;
        let specific = match &request.specific_object {
            Some(id) => object_path(id)?,
            None => ObjectPath::from_static_str_unchecked("/"),
        };

        tracing::debug!(device = %request.device, "AddAndActivateConnection");
        cancel
            .guard(async {
                let (_, active) = self
                    .nm
                    .add_and_activate_connection(connection, &device, &specific)
                    .await?;
                Ok(object_id(&active))
            })
            .await
    }

    async fn deactivate(&self, session: &ObjectId) -> Result<(), ServiceError> {
        let path = object_path(session)?;
        self.nm.deactivate_connection(&path).await?;
        Ok(())
    }

    async fn profile(&self, id: &ObjectId) -> Result<ConnectionProfile, ServiceError> {
        let path = object_path(id)?;
        let proxy = SettingsConnectionProxy::builder(&self.shared.conn)
            .path(path)?
            .build()
            .await?;
        let settings = match proxy.get_settings().await {
            Ok(settings) => settings,
            Err(zbus::Error::MethodError(name, _, _))
                if name.as_str() == "org.freedesktop.DBus.Error.UnknownObject"
                    || name.as_str() == "org.freedesktop.DBus.Error.UnknownMethod" =>
            {
                return Err(ServiceError::ObjectMissing(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(ConnectionProfile::from_settings(&settings_from_dbus(
            settings,
        ))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_values_cross_the_bus() {
        let ssid = SettingValue::Bytes(b"fake net".to_vec());
        let bytes = to_dbus_value(&ssid);
        assert_eq!(
            from_dbus_value(&bytes),
            Some(SettingValue::Bytes(b"fake net".to_vec()))
        );

        let methods = SettingValue::StrList(vec!["peap".into()]);
        let list = to_dbus_value(&methods);
        assert_eq!(
            from_dbus_value(&list),
            Some(SettingValue::StrList(vec!["peap".into()]))
        );

        let unknown = SettingValue::Int(-1);
        let privacy = to_dbus_value(&unknown);
        assert_eq!(from_dbus_value(&privacy), Some(SettingValue::Int(-1)));
        assert_eq!(
            from_dbus_value(&Value::from("auto")),
            Some(SettingValue::Str("auto".into()))
        );
    }

    #[test]
    fn test_null_path_is_null_object() {
        let path = OwnedObjectPath::try_from("/").unwrap();
        assert!(object_id(&path).is_null());
        assert!(object_path(&ObjectId::new("not a path")).is_err());
    }
}
