//! Control/query JSON payload construction and discovery-beacon parsing.

use serde::Deserialize;
use serde_json::json;

/// `{"devId":"...","uid":"...","t":"...","dps":{"<N>":<bool>}}`
pub fn control_payload(dev_id: &str, control_point: u32, state: bool, now: u64) -> Vec<u8> {
    let body = json!({
        "devId": dev_id,
        "uid": dev_id,
        "t": now.to_string(),
        "dps": { control_point.to_string(): state },
    });
    body.to_string().into_bytes()
}

/// `{"devId":"...","uid":"...","t":"..."}`
pub fn query_payload(dev_id: &str, now: u64) -> Vec<u8> {
    let body = json!({
        "devId": dev_id,
        "uid": dev_id,
        "t": now.to_string(),
    });
    body.to_string().into_bytes()
}

/// Read `dps.<control_point>` out of a decoded STATUS/QUERY response body.
/// Returns `None` if the body isn't an object, the key is absent, or the
/// value isn't a boolean.
pub fn extract_dp_bool(body: &[u8], control_point: u32) -> Option<bool> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("dps")?
        .get(control_point.to_string())?
        .as_bool()
}

/// Fields recognized in a discovery beacon. Anything else in the beacon's
/// JSON is ignored; the `ip` field (if present) is advisory only — the
/// caller uses the UDP datagram's source address instead.
#[derive(Debug, Deserialize)]
pub struct Beacon {
    #[serde(rename = "gwId")]
    pub gw_id: String,
    #[serde(rename = "productKey")]
    pub product_key: String,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub version: Option<String>,
}

/// Parse a decoded beacon body. Returns `None` if it isn't a JSON object,
/// or is missing either required field.
pub fn parse_beacon(body: &[u8]) -> Option<Beacon> {
    serde_json::from_slice(body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_payload_shape() {
        let bytes = control_payload("abc123", 20, true, 1000);
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["devId"], "abc123");
        assert_eq!(value["uid"], "abc123");
        assert_eq!(value["t"], "1000");
        assert_eq!(value["dps"]["20"], true);
    }

    #[test]
    fn query_payload_has_no_dps() {
        let bytes = query_payload("abc123", 1000);
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("dps").is_none());
    }

    #[test]
    fn extract_dp_bool_reads_named_point() {
        let body = br#"{"dps":{"20":true,"1":false}}"#;
        assert_eq!(extract_dp_bool(body, 20), Some(true));
        assert_eq!(extract_dp_bool(body, 1), Some(false));
        assert_eq!(extract_dp_bool(body, 99), None);
    }

    #[test]
    fn parse_beacon_requires_gw_id_and_product_key() {
        let good = br#"{"gwId":"abc123","productKey":"keyXYZ","encrypt":true,"version":"3.3","ip":"10.0.0.1"}"#;
        let beacon = parse_beacon(good).unwrap();
        assert_eq!(beacon.gw_id, "abc123");
        assert_eq!(beacon.product_key, "keyXYZ");
        assert!(beacon.encrypt);
        assert_eq!(beacon.version.as_deref(), Some("3.3"));

        let missing_product_key = br#"{"gwId":"abc123"}"#;
        assert!(parse_beacon(missing_product_key).is_none());
    }
}
