use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::models::capability::CapabilityRecord;
use crate::models::device::DeviceRecord;
use crate::models::synergy::{FeatureOpportunity, Impact};

/// Joins device instances to capability records and ranks the features that
/// are available but not configured. Pure function of its inputs; the
/// pipeline hands it the registry snapshot and the capability cache.
pub struct FeatureAnalyzer;

#[derive(Debug, Default, Clone, Serialize)]
pub struct FeatureAnalysisReport {
    pub overall_utilization: f64,
    pub total_devices: usize,
    pub devices_analyzed: usize,
    pub total_configured: usize,
    pub total_available: usize,
    pub by_manufacturer: BTreeMap<String, ManufacturerStats>,
    pub opportunities: Vec<FeatureOpportunity>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ManufacturerStats {
    pub utilization: f64,
    pub devices: usize,
    pub configured: usize,
    pub available: usize,
}

#[derive(Debug, Clone)]
pub struct DeviceAnalysis {
    pub device_id: String,
    pub manufacturer: String,
    pub model: String,
    pub total_features: usize,
    pub configured_count: usize,
    pub utilization: f64,
    pub unused_features: Vec<String>,
    pub opportunities: Vec<FeatureOpportunity>,
}

impl FeatureAnalyzer {
    pub fn analyze(
        &self,
        devices: &[DeviceRecord],
        capability_index: &BTreeMap<String, CapabilityRecord>,
    ) -> FeatureAnalysisReport {
        let mut report = FeatureAnalysisReport {
            total_devices: devices.len(),
            ..Default::default()
        };

        for device in devices {
            let Some(record) = capability_index.get(&device.model) else {
                continue;
            };
            let analysis = self.analyze_device(device, record);
            report.devices_analyzed += 1;
            report.total_configured += analysis.configured_count;
            report.total_available += analysis.total_features;

            let stats = report
                .by_manufacturer
                .entry(analysis.manufacturer.clone())
                .or_default();
            stats.devices += 1;
            stats.configured += analysis.configured_count;
            stats.available += analysis.total_features;

            report.opportunities.extend(analysis.opportunities);
        }

        for stats in report.by_manufacturer.values_mut() {
            if stats.available > 0 {
                stats.utilization =
                    (stats.configured as f64 / stats.available as f64 * 1000.0).round() / 10.0;
            }
        }
        if report.total_available > 0 {
            report.overall_utilization = (report.total_configured as f64
                / report.total_available as f64
                * 1000.0)
                .round()
                / 10.0;
        }

        rank_opportunities(&mut report.opportunities);
        tracing::info!(
            "feature analysis: {}/{} devices matched, utilization {:.1}%, {} opportunities",
            report.devices_analyzed,
            report.total_devices,
            report.overall_utilization,
            report.opportunities.len(),
        );
        report
    }

    pub fn analyze_device(
        &self,
        device: &DeviceRecord,
        record: &CapabilityRecord,
    ) -> DeviceAnalysis {
        let available: BTreeSet<&str> = record.capabilities.keys().map(String::as_str).collect();
        let configured = configured_features(device);
        let configured: BTreeSet<&str> = configured.iter().map(String::as_str).collect();
        let unused: Vec<&str> = available.difference(&configured).copied().collect();

        let utilization = if available.is_empty() {
            0.0
        } else {
            (configured.len() as f64 / available.len() as f64 * 1000.0).round() / 10.0
        };

        let opportunities: Vec<FeatureOpportunity> = unused
            .iter()
            .map(|feature_name| {
                let descriptor = &record.capabilities[*feature_name];
                let impact = assess_impact(feature_name);
                FeatureOpportunity {
                    device_id: device.device_id.clone(),
                    device_name: if device.name.is_empty() {
                        device.device_id.clone()
                    } else {
                        device.name.clone()
                    },
                    manufacturer: record.manufacturer.clone(),
                    model: record.device_model.clone(),
                    feature_name: (*feature_name).to_string(),
                    feature_kind: descriptor.kind.name().to_string(),
                    complexity: descriptor.complexity,
                    impact,
                    priority_score: impact.weight() * descriptor.complexity.weight(),
                }
            })
            .collect();

        DeviceAnalysis {
            device_id: device.device_id.clone(),
            manufacturer: record.manufacturer.clone(),
            model: record.device_model.clone(),
            total_features: available.len(),
            configured_count: configured.len(),
            utilization,
            unused_features: unused.into_iter().map(str::to_string).collect(),
            opportunities,
        }
    }
}

/// Configured features are derived heuristically from the device's entity
/// domains: having a `light.*` entity means basic light control is in use,
/// and so on. Everything else the capability record lists counts as unused.
fn configured_features(device: &DeviceRecord) -> BTreeSet<String> {
    let mut configured = BTreeSet::new();
    for entity in &device.entities {
        let entity_lower = entity.entity_id.to_lowercase();
        match entity.domain() {
            "light" => {
                configured.insert("light_control".to_string());
            }
            "switch" => {
                configured.insert("switch_control".to_string());
            }
            "climate" => {
                configured.insert("climate_control".to_string());
            }
            "binary_sensor" => {
                if entity_lower.contains("contact") || entity_lower.contains("door") {
                    configured.insert("contact".to_string());
                }
                if entity_lower.contains("motion") || entity_lower.contains("occupancy") {
                    configured.insert("occupancy".to_string());
                }
            }
            _ => {}
        }
    }
    configured
}

/// Impact heuristic by feature-name keyword.
fn assess_impact(feature_name: &str) -> Impact {
    const HIGH: &[&str] = &[
        "led",
        "notification",
        "alert",
        "automation",
        "energy",
        "power",
        "status",
        "indicator",
    ];
    const MEDIUM: &[&str] = &[
        "timer",
        "mode",
        "preset",
        "schedule",
        "delay",
        "duration",
        "threshold",
        "sensitivity",
    ];

    let lower = feature_name.to_lowercase();
    if HIGH.iter().any(|kw| lower.contains(kw)) {
        Impact::High
    } else if MEDIUM.iter().any(|kw| lower.contains(kw)) {
        Impact::Medium
    } else {
        Impact::Low
    }
}

/// Highest priority first; ties broken by device id then feature name so
/// the ranking is total and stable across runs.
fn rank_opportunities(opportunities: &mut [FeatureOpportunity]) {
    opportunities.sort_by(|a, b| {
        b.priority_score
            .cmp(&a.priority_score)
            .then_with(|| a.device_id.cmp(&b.device_id))
            .then_with(|| a.feature_name.cmp(&b.feature_name))
    });
}
