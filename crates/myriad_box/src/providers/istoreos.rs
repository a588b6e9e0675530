//! Latest iStoreOS firmware releases for one device model.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::provider::FetchContext;
use crate::provider::FetchError;
use crate::provider::FieldDescriptor;
use crate::provider::FieldValues;
use crate::provider::Payload;
use crate::provider::Provider;
use crate::provider::Rendered;
use crate::provider::SensorDescriptor;
use crate::provider::UNKNOWN;
use super::or_unknown;
use super::send_json;

const DEFAULT_URL: &str = "https://fwindex.koolcenter.com/api/fw/device";
const DEFAULT_DEVICE: &str = "seed-ac2";
const FIRMWARE: &str = "iStoreOS";

/// Device code -> display name.
const DEVICES: &[(&str, &str)] = &[
    ("seed-ac1", "Seed AC1"),
    ("seed-ac2", "Seed AC2"),
    ("seed-ac3", "Seed AC3"),
    ("r2s", "R2S"),
    ("r3s", "R3S"),
    ("r4s", "R4S"),
    ("r4s-1g", "R4S 1G"),
    ("r4se", "R4SE"),
    ("r5s", "R5S"),
    ("r6s", "R6S"),
    ("r6xs", "R6XS"),
    ("r66s", "R66S"),
    ("r68s", "R68S"),
    ("r76s", "R76S"),
    ("rpi4", "Raspberry Pi 4"),
    ("rpi5", "Raspberry Pi 5"),
    ("x86_64", "X86_64"),
    ("x86_64_efi", "X86_64 EFI"),
    ("t68m", "T68M"),
    ("station-p2", "Station P2"),
    ("mt3000", "MT3000"),
    ("h28k", "H28K"),
    ("h88k", "H88K"),
    ("h6xk", "H6XK"),
    ("e20c", "E20C"),
    ("e52c", "E52C"),
    ("e54c", "E54C"),
];

const DEVICE_CODES: &[&str] = &[
    "seed-ac1",
    "seed-ac2",
    "seed-ac3",
    "r2s",
    "r3s",
    "r4s",
    "r4s-1g",
    "r4se",
    "r5s",
    "r6s",
    "r6xs",
    "r66s",
    "r68s",
    "r76s",
    "rpi4",
    "rpi5",
    "x86_64",
    "x86_64_efi",
    "t68m",
    "station-p2",
    "mt3000",
    "h28k",
    "h88k",
    "h6xk",
    "e20c",
    "e52c",
    "e54c",
];

const SCHEMA: &[FieldDescriptor] = &[
    FieldDescriptor::text("url", "API URL").with_default(DEFAULT_URL),
    FieldDescriptor::select("device", "Device model", DEVICE_CODES).with_default(DEFAULT_DEVICE),
];

const SENSORS: &[SensorDescriptor] = &[
    SensorDescriptor {
        key: "device",
        name: "Device",
        icon: "mdi:devices",
        unit: None,
    },
    SensorDescriptor {
        key: "latest_version",
        name: "Latest version",
        icon: "mdi:tag",
        unit: None,
    },
    SensorDescriptor {
        key: "release_count",
        name: "Releases",
        icon: "mdi:counter",
        unit: Some("releases"),
    },
];

#[derive(Debug, Deserialize)]
struct DeviceResponse {
    result: Option<DeviceResult>,
}

#[derive(Debug, Deserialize)]
struct DeviceResult {
    #[serde(default)]
    device: DeviceInfo,
    #[serde(default)]
    releases: Vec<Release>,
}

#[derive(Debug, Default, Deserialize)]
struct DeviceInfo {
    cover: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Release {
    release: Option<String>,
}

#[derive(Debug, Clone)]
struct Firmware {
    device: String,
    cover: Option<String>,
    /// Newest first, as the API returns them.
    releases: Vec<Option<String>>,
}

pub struct IStoreOs;

fn device_name(code: &str) -> &str {
    DEVICES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .unwrap_or(code)
}

#[async_trait]
impl Provider for IStoreOs {
    fn id(&self) -> &'static str {
        "istoreos"
    }

    fn display_name(&self) -> &'static str {
        "iStoreOS firmware"
    }

    fn icon(&self) -> &'static str {
        "mdi:package-variant"
    }

    fn config_schema(&self) -> &'static [FieldDescriptor] {
        SCHEMA
    }

    fn sensors(&self) -> &'static [SensorDescriptor] {
        SENSORS
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(300 * 60)
    }

    async fn fetch(&self, ctx: &FetchContext, fields: &FieldValues) -> Result<Payload, FetchError> {
        let url = fields.text("url").unwrap_or(DEFAULT_URL);
        let device = fields.text("device").unwrap_or(DEFAULT_DEVICE);

        let response: DeviceResponse = send_json(
            ctx.client
                .post(url)
                .json(&json!({ "deviceName": device, "firmwareName": FIRMWARE }))
                .timeout(ctx.timeout),
        )
        .await?;

        let result = response
            .result
            .ok_or_else(|| FetchError::parse("response has no result"))?;

        Ok(Payload::new(Firmware {
            device: device.to_string(),
            cover: result.device.cover.filter(|c| !c.is_empty()),
            releases: result.releases.into_iter().map(|r| r.release).collect(),
        }))
    }

    fn render(&self, payload: &Payload) -> Rendered {
        let Some(firmware) = payload.downcast_ref::<Firmware>() else {
            return self.placeholder(UNKNOWN);
        };

        let latest = firmware.releases.first().and_then(|r| r.as_deref());

        Rendered::default()
            .value("device", device_name(&firmware.device))
            .value("latest_version", or_unknown(latest))
            .value("release_count", firmware.releases.len().to_string())
            .attribute("device_code", &firmware.device)
            .attribute("device_cover", &firmware.cover)
            .attribute("firmware", FIRMWARE)
    }
}
