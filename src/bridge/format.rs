//! Plain-text projections of node records for the chat side.

use chrono::{DateTime, Utc};

use super::nodes::{NodeStore, Section};
use crate::meshtastic::NodeId;

/// Battery level the firmware reports for externally powered nodes.
pub const BATTERY_POWERED: u32 = 101;

pub fn format_battery(level: Option<u32>) -> String {
    match level {
        Some(BATTERY_POWERED) => "PWR".to_string(),
        Some(l) => format!("{}%", l),
        None => "N/A".to_string(),
    }
}

pub fn format_percentage(value: Option<f32>) -> String {
    match value {
        Some(v) => format!("{:.2}%", v),
        None => "N/A".to_string(),
    }
}

pub fn format_date(date: Option<DateTime<Utc>>) -> String {
    match date {
        Some(d) => d.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "N/A".to_string(),
    }
}

pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    format!("{}d {:02}h {:02}m", days, hours, minutes)
}

pub fn format_route(route: &[NodeId]) -> String {
    route
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" → ")
}

fn format_section(header: String, section: &Section) -> String {
    let mut lines = vec![header];
    lines.extend(section.iter().map(|(k, v)| format!("  {}: {}", k, v)));
    lines.join("\n")
}

impl NodeStore {
    pub fn format_info(&self, id: NodeId) -> String {
        let Some(node) = self.get(id) else {
            return format!("ℹ️ No information available for node {}", id);
        };
        let short = node.short_name.as_deref().unwrap_or("unknown");
        let mut info = vec![format!("🔷 Node {} ({}):", id, short)];
        if let Some(v) = &node.long_name {
            info.push(format!("📝 Long name: {}", v));
        }
        if let Some(v) = &node.hw_model {
            info.push(format!("🖥️ Hardware: {}", v));
        }
        if node.battery_level.is_some() {
            info.push(format!("🔋 Battery: {}", format_battery(node.battery_level)));
        }
        if let Some(v) = node.voltage {
            info.push(format!("⚡ Voltage: {:.2} V", v));
        }
        if node.channel_utilization.is_some() {
            info.push(format!(
                "📊 Channel utilization: {}",
                format_percentage(node.channel_utilization)
            ));
        }
        if node.air_util_tx.is_some() {
            info.push(format!(
                "📡 Air utilization TX: {}",
                format_percentage(node.air_util_tx)
            ));
        }
        if let Some(v) = node.temperature {
            info.push(format!("🌡️ Temperature: {:.1} °C", v));
        }
        if let Some(v) = node.relative_humidity {
            info.push(format!("💧 Humidity: {:.1}%", v));
        }
        if let Some(v) = node.barometric_pressure {
            info.push(format!("🌪️ Pressure: {:.1} hPa", v));
        }
        if let Some(v) = node.gas_resistance {
            info.push(format!("💨 Gas resistance: {:.2} MΩ", v));
        }
        if let Some(v) = node.current {
            info.push(format!("⚡ Current: {:.1} mA", v));
        }
        if node.inactive {
            info.push("💤 Inactive".to_string());
        }
        info.push(format!("🕒 Last updated: {}", format_date(Some(node.last_updated))));
        info.join("\n")
    }

    pub fn format_telemetry(&self, id: NodeId) -> String {
        let Some(node) = self.get(id) else {
            return format!("📊 No telemetry available for node {}", id);
        };
        let uptime = node
            .uptime_seconds
            .map(|u| u.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        format!(
            "📊 Telemetry for node {}:\n\
             🔋 Battery: {}\n\
             📡 Air Utilization TX: {}\n\
             📊 Channel Utilization: {}\n\
             ⏱️ Uptime: {} seconds\n\
             🕒 Last updated: {}",
            id,
            format_battery(node.battery_level),
            format_percentage(node.air_util_tx),
            format_percentage(node.channel_utilization),
            uptime,
            format_date(Some(node.last_updated)),
        )
    }

    pub fn format_position(&self, id: NodeId) -> String {
        let Some(node) = self.get(id) else {
            return format!("📍 No position available for node {}", id);
        };
        let coord = |v: Option<f64>| {
            v.map(|v| format!("{:.6}", v))
                .unwrap_or_else(|| "N/A".to_string())
        };
        format!(
            "📍 Position for node {}:\n🌎 Latitude: {}\n🌍 Longitude: {}\n🕒 Last updated: {}",
            id,
            coord(node.latitude),
            coord(node.longitude),
            format_date(node.last_position_update),
        )
    }

    /// Latest environment readings plus the sensor section.
    pub fn format_environment(&self, id: NodeId) -> String {
        let Some(node) = self.get(id) else {
            return format!("🌡️ No environment data available for node {}", id);
        };
        let reading = |v: Option<f32>, unit: &str| {
            v.map(|v| format!("{:.1}{}", v, unit))
                .unwrap_or_else(|| "N/A".to_string())
        };
        let mut text = format!(
            "🌡️ Environment for node {}:\n\
             🌡️ Temperature: {}\n\
             💧 Humidity: {}\n\
             🌪️ Pressure: {}",
            id,
            reading(node.temperature, " °C"),
            reading(node.relative_humidity, "%"),
            reading(node.barometric_pressure, " hPa"),
        );
        if let Some(sensor) = &node.sensor {
            for (k, v) in sensor {
                text.push_str(&format!("\n🔬 {}: {}", k, v));
            }
        }
        text
    }

    pub fn format_routing(&self, id: NodeId) -> String {
        match self.get(id).and_then(|n| n.routing.as_ref()) {
            Some(s) => format_section(format!("🔀 Routing information for node {}:", id), s),
            None => format!("🔀 No routing information available for node {}", id),
        }
    }

    pub fn format_neighbors(&self, id: NodeId) -> String {
        match self.get(id).and_then(|n| n.neighbors.as_ref()) {
            Some(s) => format_section(format!("👥 Neighbor information for node {}:", id), s),
            None => format!("👥 No neighbor information available for node {}", id),
        }
    }

    pub fn format_sensor(&self, id: NodeId) -> String {
        match self.get(id).and_then(|n| n.sensor.as_ref()) {
            Some(s) => format_section(format!("🔬 Sensor information for node {}:", id), s),
            None => format!("🔬 No sensor information available for node {}", id),
        }
    }

    /// All sections, separated by blank lines (the `/node` reply).
    pub fn format_node(&self, id: NodeId) -> String {
        [
            self.format_info(id),
            self.format_telemetry(id),
            self.format_position(id),
            self.format_routing(id),
            self.format_neighbors(id),
            self.format_sensor(id),
        ]
        .join("\n\n")
    }
}
