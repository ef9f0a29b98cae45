use serde::{Deserialize, Deserializer};

pub const DEFAULT_COMMUNITY: &str = "public";
pub const DEFAULT_PORT: u16 = 161;
pub const DEFAULT_VERSION: &str = "2c";
pub const DEFAULT_TRANSPORT: &str = "udp";

/// A monitored endpoint as exported by the device catalog.
///
/// Field names follow the catalog documents (`_id`, `ip`, `StatusIcmp`,
/// `SnmpSettings`), while snake_case aliases keep hand-written TOML
/// inventories readable.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DeviceRecord {
    #[serde(rename = "_id", alias = "id", default, deserialize_with = "deserialize_catalog_id")]
    pub id: String,
    #[serde(rename = "ip", alias = "address")]
    pub address: String,
    pub name: String,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "StatusIcmp", alias = "status_icmp", default)]
    pub status_icmp: Option<String>,
    #[serde(rename = "SnmpSettings", alias = "snmp", default)]
    pub snmp: SnmpSettings,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SnmpSettings {
    #[serde(default)]
    pub community: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl DeviceRecord {
    /// SNMP community, falling back to `public` when unset or empty.
    pub fn community(&self) -> &str {
        non_empty(self.snmp.community.as_deref()).unwrap_or(DEFAULT_COMMUNITY)
    }

    /// SNMP agent port, falling back to 161 when unset or zero.
    pub fn port(&self) -> u16 {
        match self.snmp.port {
            Some(port) if port > 0 => port,
            _ => DEFAULT_PORT,
        }
    }

    /// SNMP protocol version as written in the catalog, `2c` when unset.
    pub fn version(&self) -> &str {
        non_empty(self.snmp.version.as_deref()).unwrap_or(DEFAULT_VERSION)
    }

    pub fn transport(&self) -> &str {
        non_empty(self.snmp.protocol.as_deref()).unwrap_or(DEFAULT_TRANSPORT)
    }

    /// Whether the catalog currently flags the device as answering ICMP.
    pub fn is_reachable(&self) -> bool {
        self.status_icmp
            .as_deref()
            .is_some_and(|status| status.trim().eq_ignore_ascii_case("up"))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

// Catalog exports write object ids either as plain strings or as `{"$oid": "..."}`.
fn deserialize_catalog_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CatalogId {
        Plain(String),
        Extended {
            #[serde(rename = "$oid")]
            oid: String,
        },
        Numeric(i64),
    }

    Ok(match CatalogId::deserialize(deserializer)? {
        CatalogId::Plain(id) => id,
        CatalogId::Extended { oid } => oid,
        CatalogId::Numeric(id) => id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_with(settings: SnmpSettings) -> DeviceRecord {
        DeviceRecord {
            id: "64f0c0ffee".to_string(),
            address: "10.0.0.1".to_string(),
            name: "core-sw-01".to_string(),
            snmp: settings,
            ..Default::default()
        }
    }

    #[test]
    fn test_unset_snmp_settings_use_defaults() {
        let device = device_with(SnmpSettings::default());

        assert_eq!(device.community(), "public");
        assert_eq!(device.port(), 161);
        assert_eq!(device.version(), "2c");
        assert_eq!(device.transport(), "udp");
    }

    #[test]
    fn test_empty_and_zero_values_fall_back() {
        let device = device_with(SnmpSettings {
            community: Some(String::new()),
            port: Some(0),
            protocol: Some(String::new()),
            version: Some(String::new()),
        });

        assert_eq!(device.community(), "public");
        assert_eq!(device.port(), 161);
        assert_eq!(device.version(), "2c");
    }

    #[test]
    fn test_overrides_are_preserved() {
        let device = device_with(SnmpSettings {
            community: Some("n0c-r3ad".to_string()),
            port: Some(1161),
            protocol: Some("udp".to_string()),
            version: Some("1".to_string()),
        });

        assert_eq!(device.community(), "n0c-r3ad");
        assert_eq!(device.port(), 1161);
        assert_eq!(device.version(), "1");
    }

    #[test]
    fn test_deserialize_catalog_document() {
        let json = r#"{
            "_id": {"$oid": "65a1b2c3d4e5f60718293a4b"},
            "ip": "172.16.9.20",
            "name": "olt-norte",
            "make": "Huawei",
            "StatusIcmp": "up",
            "SnmpSettings": {"community": "private", "port": 161}
        }"#;

        let device: DeviceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(device.id, "65a1b2c3d4e5f60718293a4b");
        assert_eq!(device.address, "172.16.9.20");
        assert_eq!(device.community(), "private");
        assert_eq!(device.version(), "2c");
        assert!(device.is_reachable());
    }

    #[test]
    fn test_missing_snmp_settings_block() {
        let json = r#"{"_id": "abc", "ip": "10.1.1.1", "name": "edge", "StatusIcmp": "down"}"#;

        let device: DeviceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(device.snmp, SnmpSettings::default());
        assert!(!device.is_reachable());
    }
}
