//! rxpk/stat/txpk JSON shapes, base64 payload encoding, and `datr`/`codr`
//! parsing (§4.3).
//!
//! The `rxpk`/`txpk` arrays are nested enough that hand-rolled `format!`
//! string-building (the teacher's style for its stats HTTP endpoint) would
//! be error-prone for the base64 payload, so those go through
//! `serde`/`serde_json`. The flat `stat` object still follows the teacher's
//! `to_json()`-via-`format!` convention directly (see [`crate::stats`]).

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::model::{Bandwidth, CodingRate, Modulation, RxDescriptor, Schedule, TxRequest};

#[derive(Debug)]
pub enum DecodeError {
    InvalidJson(String),
    MissingTxpk,
    InvalidDatr(String),
    InvalidCodr(String),
    InvalidBase64,
    PayloadTooLarge(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson(msg) => write!(f, "invalid JSON: {msg}"),
            Self::MissingTxpk => write!(f, "missing txpk object"),
            Self::InvalidDatr(s) => write!(f, "invalid datr: {s}"),
            Self::InvalidCodr(s) => write!(f, "invalid codr: {s}"),
            Self::InvalidBase64 => write!(f, "invalid base64 payload"),
            Self::PayloadTooLarge(n) => write!(f, "payload of {n} bytes exceeds 255"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Semtech error codes carried in a TX_ACK body (§4.3).
impl DecodeError {
    pub fn tx_ack_code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::MissingTxpk => "MISSING_TXPK",
            Self::InvalidDatr(_) | Self::InvalidCodr(_) | Self::InvalidBase64 => "INVALID_JSON",
            Self::PayloadTooLarge(_) => "TX_FAILED",
        }
    }
}

#[derive(Debug, Serialize)]
struct RxPkJson {
    tmst: u32,
    freq: f64,
    chan: u8,
    rfch: u8,
    stat: &'static str,
    modu: &'static str,
    datr: String,
    codr: String,
    rssi: i32,
    lsnr: f64,
    size: u16,
    data: String,
}

#[derive(Debug, Serialize)]
struct PushDataUplink<'a> {
    rxpk: &'a [RxPkJson],
}

/// Build the JSON body of a PUSH_DATA uplink datagram (§4.3) from a batch
/// of descriptors. `chan`/`rfch` are supplied by the caller since the
/// descriptor itself only carries the frequency actually used.
pub fn encode_uplink_batch(descriptors: &[(RxDescriptor, u8)]) -> String {
    let rxpk: Vec<RxPkJson> = descriptors
        .iter()
        .map(|(d, chan)| RxPkJson {
            tmst: d.hw_timestamp_us,
            freq: d.modulation.frequency_hz as f64 / 1_000_000.0,
            chan: *chan,
            rfch: d.rf_chain_index,
            stat: if d.crc_ok { "OK" } else { "CRC" },
            modu: "LORA",
            datr: d.modulation.datr(),
            codr: d.modulation.coding_rate.to_string(),
            rssi: d.rssi_dbm as i32,
            lsnr: d.snr_db as f64,
            size: d.payload.len() as u16,
            data: BASE64.encode(&d.payload),
        })
        .collect();
    serde_json::to_string(&PushDataUplink { rxpk: &rxpk }).expect("rxpk array is always valid JSON")
}

#[derive(Debug, Deserialize)]
struct TxpkJson {
    imme: Option<bool>,
    tmst: Option<u32>,
    freq: f64,
    powe: i8,
    datr: String,
    codr: String,
    ipol: bool,
    data: String,
}

#[derive(Debug, Deserialize)]
struct PullRespBody {
    txpk: Option<TxpkJson>,
}

/// Decode a PULL_RESP JSON body into a [`TxRequest`] (§4.3 "Downlink handling").
pub fn decode_pull_resp(body: &str) -> Result<TxRequest, DecodeError> {
    let parsed: PullRespBody =
        serde_json::from_str(body).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    let txpk = parsed.txpk.ok_or(DecodeError::MissingTxpk)?;

    let (sf, bandwidth) =
        Modulation::parse_datr(&txpk.datr).ok_or_else(|| DecodeError::InvalidDatr(txpk.datr.clone()))?;
    let coding_rate =
        CodingRate::from_str(&txpk.codr).ok_or_else(|| DecodeError::InvalidCodr(txpk.codr.clone()))?;

    let payload = BASE64
        .decode(txpk.data.as_bytes())
        .map_err(|_| DecodeError::InvalidBase64)?;
    if payload.len() > 255 {
        return Err(DecodeError::PayloadTooLarge(payload.len()));
    }

    let schedule = if txpk.imme.unwrap_or(false) {
        Schedule::Immediate
    } else if let Some(tmst) = txpk.tmst {
        Schedule::At(tmst)
    } else {
        Schedule::Immediate
    };

    Ok(TxRequest {
        payload,
        modulation: Modulation {
            frequency_hz: (txpk.freq * 1_000_000.0).round() as u32,
            bandwidth,
            spreading_factor: sf,
            coding_rate,
        },
        tx_power_dbm: txpk.powe,
        schedule,
        invert_iq: txpk.ipol,
    })
}

/// Encode a TX_ACK JSON body. `error` is `None` for a successful acceptance
/// (§4.3: "emit TX_ACK with no error").
pub fn encode_tx_ack(error: Option<&str>) -> Option<String> {
    error.map(|code| format!(r#"{{"txpk_ack":{{"error":"{code}"}}}}"#))
}

/// Encode the `stat` JSON object for a statistics PUSH_DATA (§4.3).
/// Numeric fields come from [`crate::stats::GatewayStats::to_json_fields`];
/// this just wraps them with the wall-clock timestamp the way the teacher's
/// `to_json()` methods assemble nested objects with `format!`.
pub fn encode_stat(time_gmt: &str, stat_fields: &str) -> String {
    format!(r#"{{"stat":{{"time":"{time_gmt}",{stat_fields}}}}}"#)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bandwidth;

    fn sample_descriptor() -> RxDescriptor {
        RxDescriptor {
            payload: b"Hello World".to_vec(),
            modulation: Modulation {
                frequency_hz: 916_800_000,
                bandwidth: Bandwidth::Khz125,
                spreading_factor: 7,
                coding_rate: CodingRate::CR_4_5,
            },
            rssi_dbm: -39,
            snr_db: 10.0,
            crc_ok: true,
            hw_timestamp_us: 123_456,
            rf_chain_index: 0,
        }
    }

    #[test]
    fn encode_uplink_batch_matches_scenario_8b() {
        let json = encode_uplink_batch(&[(sample_descriptor(), 3)]);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let rxpk = &parsed["rxpk"][0];
        assert_eq!(rxpk["tmst"], 123_456);
        assert_eq!(rxpk["freq"], 916.8);
        assert_eq!(rxpk["datr"], "SF7BW125");
        assert_eq!(rxpk["codr"], "4/5");
        assert_eq!(rxpk["rssi"], -39);
        assert_eq!(rxpk["size"], 11);
        assert_eq!(rxpk["data"], "SGVsbG8gV29ybGQ=");
    }

    #[test]
    fn decode_pull_resp_immediate_downlink() {
        let body = r#"{"txpk":{"imme":true,"freq":923.3,"powe":14,"datr":"SF12BW500","codr":"4/5","ipol":true,"size":11,"data":"SGVsbG8gV29ybGQ="}}"#;
        let req = decode_pull_resp(body).unwrap();
        assert_eq!(req.payload, b"Hello World");
        assert_eq!(req.modulation.frequency_hz, 923_300_000);
        assert_eq!(req.modulation.spreading_factor, 12);
        assert_eq!(req.modulation.bandwidth, Bandwidth::Khz500);
        assert_eq!(req.schedule, Schedule::Immediate);
        assert!(req.invert_iq);
    }

    #[test]
    fn decode_pull_resp_scheduled_downlink() {
        let body = r#"{"txpk":{"tmst":1050000,"freq":916.8,"powe":20,"datr":"SF7BW125","codr":"4/8","ipol":true,"size":2,"data":"aGk="}}"#;
        let req = decode_pull_resp(body).unwrap();
        assert_eq!(req.schedule, Schedule::At(1_050_000));
        assert_eq!(req.tx_power_dbm, 20);
    }

    #[test]
    fn decode_pull_resp_rejects_missing_txpk() {
        let err = decode_pull_resp(r#"{}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingTxpk));
        assert_eq!(err.tx_ack_code(), "MISSING_TXPK");
    }

    #[test]
    fn decode_pull_resp_rejects_invalid_json() {
        let err = decode_pull_resp("not json").unwrap_err();
        assert_eq!(err.tx_ack_code(), "INVALID_JSON");
    }

    #[test]
    fn decode_pull_resp_rejects_oversized_payload() {
        let data = BASE64.encode(vec![0u8; 256]);
        let body = format!(
            r#"{{"txpk":{{"imme":true,"freq":923.3,"powe":14,"datr":"SF12BW500","codr":"4/5","ipol":true,"size":256,"data":"{data}"}}}}"#
        );
        let err = decode_pull_resp(&body).unwrap_err();
        assert!(matches!(err, DecodeError::PayloadTooLarge(256)));
    }

    #[test]
    fn tx_ack_encodes_error_or_nothing() {
        assert_eq!(encode_tx_ack(None), None);
        assert_eq!(
            encode_tx_ack(Some("TOO_LATE")),
            Some(r#"{"txpk_ack":{"error":"TOO_LATE"}}"#.to_string())
        );
    }

    #[test]
    fn base64_roundtrip_for_all_lengths_up_to_255() {
        for len in 0..=255usize {
            let payload: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let encoded = BASE64.encode(&payload);
            let expected_len = (len + 2) / 3 * 4;
            assert_eq!(encoded.len(), expected_len);
            let decoded = BASE64.decode(encoded.as_bytes()).unwrap();
            assert_eq!(decoded, payload);
        }
    }
}
