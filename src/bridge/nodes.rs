//! In-memory model of mesh participants.
//!
//! Every update is a partial [`NodeUpdate`] merged field by field into the
//! node's [`NodeRecord`]; fields absent from the update keep their previous
//! value. Each update also appends a snapshot to a per-node history capped at
//! [`HISTORY_LIMIT`] entries.
//!
//! The store does no I/O and is owned by the router, which is the only writer.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use crate::meshtastic::{DeviceMetrics, EnvironmentMetrics, NodeId, PositionReport, UserInfo};

pub const HISTORY_LIMIT: usize = 100;

/// Free-form key/value section (routing, neighbors, sensor).
pub type Section = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub hw_model: Option<String>,
    pub battery_level: Option<u32>,
    pub voltage: Option<f32>,
    pub channel_utilization: Option<f32>,
    pub air_util_tx: Option<f32>,
    pub uptime_seconds: Option<u32>,
    pub temperature: Option<f32>,
    pub relative_humidity: Option<f32>,
    pub barometric_pressure: Option<f32>,
    pub gas_resistance: Option<f32>,
    pub current: Option<f32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
    pub last_updated: DateTime<Utc>,
    pub last_position_update: Option<DateTime<Utc>>,
    pub routing: Option<Section>,
    pub neighbors: Option<Section>,
    pub sensor: Option<Section>,
    /// Set by the inactivity sweep, cleared by the next update.
    pub inactive: bool,
}

impl NodeRecord {
    fn new(now: DateTime<Utc>) -> Self {
        NodeRecord {
            short_name: None,
            long_name: None,
            hw_model: None,
            battery_level: None,
            voltage: None,
            channel_utilization: None,
            air_util_tx: None,
            uptime_seconds: None,
            temperature: None,
            relative_humidity: None,
            barometric_pressure: None,
            gas_resistance: None,
            current: None,
            latitude: None,
            longitude: None,
            altitude: None,
            last_updated: now,
            last_position_update: None,
            routing: None,
            neighbors: None,
            sensor: None,
            inactive: false,
        }
    }
}

/// Partial update; `None` fields leave the record untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub hw_model: Option<String>,
    pub battery_level: Option<u32>,
    pub voltage: Option<f32>,
    pub channel_utilization: Option<f32>,
    pub air_util_tx: Option<f32>,
    pub uptime_seconds: Option<u32>,
    pub temperature: Option<f32>,
    pub relative_humidity: Option<f32>,
    pub barometric_pressure: Option<f32>,
    pub gas_resistance: Option<f32>,
    pub current: Option<f32>,
    pub routing: Option<Section>,
    pub neighbors: Option<Section>,
    pub sensor: Option<Section>,
}

impl NodeUpdate {
    pub fn from_user(user: &UserInfo) -> Self {
        NodeUpdate {
            short_name: Some(user.short_name.clone()),
            long_name: Some(user.long_name.clone()),
            hw_model: Some(user.hw_model.clone()),
            ..Default::default()
        }
    }

    pub fn from_device_metrics(m: &DeviceMetrics) -> Self {
        NodeUpdate {
            battery_level: m.battery_level,
            voltage: m.voltage,
            channel_utilization: m.channel_utilization,
            air_util_tx: m.air_util_tx,
            uptime_seconds: m.uptime_seconds,
            ..Default::default()
        }
    }

    /// Environment readings; IAQ and lux go to the sensor section.
    pub fn from_environment(m: &EnvironmentMetrics) -> Self {
        let mut sensor = Section::new();
        if let Some(iaq) = m.iaq {
            sensor.insert("iaq".to_string(), iaq.to_string());
        }
        if let Some(lux) = m.lux {
            sensor.insert("lux".to_string(), format!("{:.1}", lux));
        }
        NodeUpdate {
            temperature: m.temperature,
            relative_humidity: m.relative_humidity,
            barometric_pressure: m.barometric_pressure,
            gas_resistance: m.gas_resistance,
            voltage: m.voltage,
            current: m.current,
            sensor: if sensor.is_empty() { None } else { Some(sensor) },
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: HashMap<NodeId, NodeRecord>,
    history: HashMap<NodeId, VecDeque<NodeRecord>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, id: NodeId, update: NodeUpdate) -> &NodeRecord {
        self.update_at(id, update, Utc::now())
    }

    /// Merge `update` into the record for `id`, stamping `now`.
    /// `last_updated` never moves backwards.
    pub fn update_at(&mut self, id: NodeId, update: NodeUpdate, now: DateTime<Utc>) -> &NodeRecord {
        let record = self
            .nodes
            .entry(id)
            .or_insert_with(|| NodeRecord::new(now));

        macro_rules! merge {
            ($($field:ident),*) => {
                $( if update.$field.is_some() { record.$field = update.$field; } )*
            };
        }
        merge!(
            short_name,
            long_name,
            hw_model,
            battery_level,
            voltage,
            channel_utilization,
            air_util_tx,
            uptime_seconds,
            temperature,
            relative_humidity,
            barometric_pressure,
            gas_resistance,
            current,
            routing,
            neighbors,
            sensor
        );
        record.last_updated = record.last_updated.max(now);
        record.inactive = false;

        let snapshot = record.clone();
        let history = self.history.entry(id).or_default();
        history.push_back(snapshot);
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
        &self.nodes[&id]
    }

    /// Store a position (wire units, degrees × 1e7). Reports without both
    /// coordinates are ignored.
    pub fn update_position(&mut self, id: NodeId, position: &PositionReport) -> bool {
        self.update_position_at(id, position, Utc::now())
    }

    pub fn update_position_at(
        &mut self,
        id: NodeId,
        position: &PositionReport,
        now: DateTime<Utc>,
    ) -> bool {
        let (Some(lat), Some(lon)) = (position.latitude_i, position.longitude_i) else {
            return false;
        };
        self.update_at(id, NodeUpdate::default(), now);
        if let Some(record) = self.nodes.get_mut(&id) {
            record.latitude = Some(lat as f64 / 1e7);
            record.longitude = Some(lon as f64 / 1e7);
            if position.altitude.is_some() {
                record.altitude = position.altitude;
            }
            record.last_position_update = Some(now);
            // history snapshot should carry the position too
            if let Some(last) = self.history.get_mut(&id).and_then(|h| h.back_mut()) {
                *last = record.clone();
            }
        }
        true
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn history(&self, id: NodeId) -> Option<&VecDeque<NodeRecord>> {
        self.history.get(&id)
    }

    pub fn get_inactive(&self, timeout: Duration) -> Vec<NodeId> {
        self.get_inactive_at(timeout, Utc::now())
    }

    /// Nodes whose last update is older than `timeout` at `now`.
    pub fn get_inactive_at(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<NodeId> {
        let limit = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| now.signed_duration_since(n.last_updated) > limit)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Flag a node inactive. Returns true only on the transition.
    pub fn mark_inactive(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(n) if !n.inactive => {
                n.inactive = true;
                true
            }
            _ => false,
        }
    }

    pub fn remove_node(&mut self, id: NodeId) -> Option<NodeRecord> {
        self.history.remove(&id);
        self.nodes.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const NODE: NodeId = NodeId(0xaaaa_1111);

    #[test]
    fn merge_keeps_unrelated_fields() {
        let mut store = NodeStore::new();
        store.update(
            NODE,
            NodeUpdate {
                short_name: Some("AAAA".into()),
                ..Default::default()
            },
        );
        store.update(
            NODE,
            NodeUpdate {
                battery_level: Some(80),
                ..Default::default()
            },
        );
        let n = store.get(NODE).unwrap();
        assert_eq!(n.short_name.as_deref(), Some("AAAA"));
        assert_eq!(n.battery_level, Some(80));
    }

    #[test]
    fn last_updated_never_goes_back() {
        let mut store = NodeStore::new();
        let later = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
        store.update_at(NODE, NodeUpdate::default(), later);
        store.update_at(NODE, NodeUpdate::default(), earlier);
        assert_eq!(store.get(NODE).unwrap().last_updated, later);
    }

    #[test]
    fn position_is_scaled() {
        let mut store = NodeStore::new();
        let applied = store.update_position(
            NODE,
            &PositionReport {
                latitude_i: Some(455_000_000),
                longitude_i: Some(-1_226_000_000),
                altitude: Some(100),
            },
        );
        assert!(applied);
        let n = store.get(NODE).unwrap();
        assert!((n.latitude.unwrap() - 45.5).abs() < 1e-9);
        assert!((n.longitude.unwrap() + 122.6).abs() < 1e-9);
        assert!(n.last_position_update.is_some());
        assert_eq!(
            store.history(NODE).unwrap().back().unwrap().latitude,
            n.latitude
        );

        assert!(!store.update_position(NodeId(2), &PositionReport::default()));
        assert!(store.get(NodeId(2)).is_none());
    }

    #[test]
    fn inactive_marking_is_one_shot() {
        let mut store = NodeStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        store.update_at(NODE, NodeUpdate::default(), t0);
        let later = t0 + chrono::Duration::seconds(301);
        assert_eq!(
            store.get_inactive_at(Duration::from_secs(300), later),
            vec![NODE]
        );
        assert!(store.mark_inactive(NODE));
        assert!(!store.mark_inactive(NODE));
        store.update_at(NODE, NodeUpdate::default(), later);
        assert!(!store.get(NODE).unwrap().inactive);
        assert!(store
            .get_inactive_at(Duration::from_secs(300), later)
            .is_empty());
    }
}
