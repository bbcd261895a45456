//! IP geolocation, map page rendering and multi-provider IP lookup

use crate::client::HttpFetcher;
use crate::error::{AppError, ErrorContext, Result};
use crate::models::{
    GeolocationReport, IpInfo, IpLookupReport, LocationRecord, LookupOutcome, ProbeError, ProbePayload,
};
use crate::orchestrator::{Probe, ProbeContext};
use crate::types::{ProbeInput, ProbeKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Provider fields that are either echoed back or not location metadata
const DROPPED_METADATA: [&str; 3] = ["ip", "loc", "readme"];

/// What a map collaborator needs to draw one marker
#[derive(Debug, Clone, PartialEq)]
pub struct MapMarker {
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
}

/// Produces a viewable artifact for a located IP
#[async_trait]
pub trait MapRenderer: Send + Sync {
    async fn render(&self, marker: &MapMarker) -> Result<PathBuf>;
}

/// Writes a Leaflet/OpenStreetMap page to a scratch file, overwritten on every call
pub struct LeafletMapRenderer {
    path: PathBuf,
}

impl LeafletMapRenderer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn page(marker: &MapMarker) -> String {
        let label = escape_html(&marker.label);
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{label}</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
var map = L.map('map').setView([{lat}, {lon}], 10);
L.tileLayer('https://{{s}}.tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png', {{
    attribution: '&copy; OpenStreetMap contributors'
}}).addTo(map);
L.marker([{lat}, {lon}]).addTo(map).bindPopup('{label}').openPopup();
</script>
</body>
</html>
"#,
            label = label,
            lat = marker.latitude,
            lon = marker.longitude,
        )
    }
}

#[async_trait]
impl MapRenderer for LeafletMapRenderer {
    async fn render(&self, marker: &MapMarker) -> Result<PathBuf> {
        tokio::fs::write(&self.path, Self::page(marker))
            .await
            .with_context(|| format!("Cannot write map page {}", self.path.display()))?;
        Ok(self.path.clone())
    }
}

fn escape_html(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#39;".to_string(),
            '\\' => "&#92;".to_string(),
            c => c.to_string(),
        })
        .collect()
}

/// IP carried by a geolocation or lookup request
fn input_ip(input: &ProbeInput) -> Result<IpAddr> {
    match input {
        ProbeInput::Ip(ip) => Ok(*ip),
        ProbeInput::Target(text) => text
            .trim()
            .parse()
            .map_err(|_| AppError::validation(format!("'{}' is not an IP address", text))),
        other => Err(AppError::validation(format!("An IP address is required, got {:?}", other))),
    }
}

/// Turn a provider answer into a location record
pub fn location_from_body(ip: IpAddr, body: serde_json::Value) -> Result<LocationRecord> {
    let info: IpInfo = serde_json::from_value(body.clone())
        .context("Unexpected geolocation response")?;
    let (latitude, longitude) = info.coordinates()?;

    let metadata: BTreeMap<String, serde_json::Value> = match body {
        serde_json::Value::Object(map) => map
            .into_iter()
            .filter(|(key, _)| !DROPPED_METADATA.contains(&key.as_str()))
            .collect(),
        _ => BTreeMap::new(),
    };

    Ok(LocationRecord {
        ip,
        latitude,
        longitude,
        metadata,
    })
}

/// `locate(ip)` against `{base}/{ip}/json`
pub struct GeolocationProbe {
    fetcher: Arc<dyn HttpFetcher>,
    base_url: String,
    renderer: Arc<dyn MapRenderer>,
}

impl GeolocationProbe {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, base_url: String, renderer: Arc<dyn MapRenderer>) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            renderer,
        }
    }

    pub async fn locate(&self, ctx: &ProbeContext, ip: IpAddr) -> Result<LocationRecord> {
        ctx.checkpoint()?;
        let url = format!("{}/{}/json", self.base_url, ip);
        let fetcher = &self.fetcher;
        let timeout = ctx.policy.http;
        let body = ctx
            .retry("geolocation", || fetcher.get_json(&url, timeout))
            .await?;
        location_from_body(ip, body)
    }
}

#[async_trait]
impl Probe for GeolocationProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Geolocation
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        let ip = input_ip(&ctx.input)?;
        let location = self.locate(ctx, ip).await?;

        ctx.progress("rendering map");
        let marker = MapMarker {
            latitude: location.latitude,
            longitude: location.longitude,
            label: ip.to_string(),
        };
        // the page is a convenience; the location stands on its own
        let map_artifact = match self.renderer.render(&marker).await {
            Ok(path) => Some(path),
            Err(error) => {
                ctx.logger
                    .warn(&format!("Map rendering failed: {}", error))
                    .correlation_id(&ctx.correlation_id)
                    .error_info(&error)
                    .log()
                    .await;
                None
            }
        };

        Ok(ProbePayload::Geolocation(GeolocationReport { location, map_artifact }))
    }
}

/// Query every lookup provider for one IP
///
/// Unlike the public IP chain, all providers are asked and each answer is
/// reported.
pub struct IpLookupProbe {
    fetcher: Arc<dyn HttpFetcher>,
    templates: Vec<String>,
}

impl IpLookupProbe {
    /// `templates` contain an `{ip}` placeholder
    pub fn new(fetcher: Arc<dyn HttpFetcher>, templates: Vec<String>) -> Self {
        Self { fetcher, templates }
    }

    async fn query(&self, ctx: &ProbeContext, template: &str, ip: IpAddr) -> LookupOutcome {
        let url = template.replace("{ip}", &ip.to_string());
        let provider = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| url.clone());

        let fetcher = &self.fetcher;
        let timeout = ctx.policy.http;
        let answer = ctx
            .retry("ip lookup", || fetcher.get_json(&url, timeout))
            .await
            .and_then(|body| {
                serde_json::from_value::<IpInfo>(body)
                    .with_context(|| format!("Unexpected response from {}", provider))
            });

        match answer {
            Ok(info) => LookupOutcome {
                provider,
                info: Some(info),
                error: None,
            },
            Err(error) => LookupOutcome {
                provider,
                info: None,
                error: Some(ProbeError::from(&error)),
            },
        }
    }
}

#[async_trait]
impl Probe for IpLookupProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::IpLookup
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<ProbePayload> {
        let ip = input_ip(&ctx.input)?;
        if self.templates.is_empty() {
            return Err(AppError::validation("No IP lookup providers configured"));
        }
        ctx.checkpoint()?;

        let outcomes =
            futures::future::join_all(self.templates.iter().map(|template| self.query(ctx, template, ip))).await;
        if outcomes.iter().all(|o| o.info.is_none()) {
            return Err(AppError::ProvidersExhausted {
                attempted: outcomes.len(),
            });
        }
        Ok(ProbePayload::IpLookup(IpLookupReport { ip, outcomes }))
    }
}
