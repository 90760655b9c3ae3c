// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Wire encoding for telemetry payloads.
//!
//! Binary payloads are big-endian. `{id}/T` carries ten `f32` values
//! (40 bytes) and `{id}/B` a single `i16`; everything else is UTF-8 text.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::domain::agent::FlightMode;
use crate::domain::geodesy::GeodeticPosition;
use crate::domain::geometry::Vec3;
use crate::domain::pose::TelemetryFrame;

pub const TELEMETRY_LEN: usize = 10 * 4;
pub const BATTERY_LEN: usize = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("payload is not valid UTF-8")]
    Utf8,

    #[error("cannot parse '{value}' as {kind}")]
    Parse { kind: &'static str, value: String },
}

pub fn encode_telemetry(frame: &TelemetryFrame) -> Bytes {
    let values = [
        frame.geodetic.latitude_deg,
        frame.geodetic.longitude_deg,
        frame.geodetic.altitude_m,
        frame.position.x,
        frame.position.y,
        frame.position.z,
        frame.velocity.x,
        frame.velocity.y,
        frame.velocity.z,
        frame.heading_deg,
    ];
    let mut buf = BytesMut::with_capacity(TELEMETRY_LEN);
    for value in values {
        buf.put_f32(value as f32);
    }
    buf.freeze()
}

pub fn decode_telemetry(payload: &[u8]) -> Result<TelemetryFrame, CodecError> {
    if payload.len() != TELEMETRY_LEN {
        return Err(CodecError::Length {
            expected: TELEMETRY_LEN,
            actual: payload.len(),
        });
    }
    let mut buf = payload;
    let mut next = || f64::from(buf.get_f32());
    let geodetic = GeodeticPosition::new(next(), next(), next());
    let position = Vec3::new(next(), next(), next());
    let velocity = Vec3::new(next(), next(), next());
    let heading_deg = next();
    Ok(TelemetryFrame {
        geodetic,
        position,
        velocity,
        heading_deg,
    })
}

/// Battery percent rounded to the nearest whole percent.
pub fn encode_battery(percent: f64) -> Bytes {
    let clamped = percent.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX));
    let value = if clamped.is_finite() { clamped as i16 } else { 0 };
    Bytes::copy_from_slice(&value.to_be_bytes())
}

pub fn decode_battery(payload: &[u8]) -> Result<f64, CodecError> {
    let bytes: [u8; BATTERY_LEN] = payload.try_into().map_err(|_| CodecError::Length {
        expected: BATTERY_LEN,
        actual: payload.len(),
    })?;
    Ok(f64::from(i16::from_be_bytes(bytes)))
}

pub fn encode_text(text: &str) -> Bytes {
    Bytes::copy_from_slice(text.as_bytes())
}

pub fn decode_text(payload: &[u8]) -> Result<&str, CodecError> {
    std::str::from_utf8(payload)
        .map(str::trim)
        .map_err(|_| CodecError::Utf8)
}

pub fn encode_arm_status(armed: bool) -> Bytes {
    encode_text(if armed { "true" } else { "false" })
}

pub fn decode_arm_status(payload: &[u8]) -> Result<bool, CodecError> {
    match decode_text(payload)? {
        "true" | "True" => Ok(true),
        "false" | "False" => Ok(false),
        other => Err(CodecError::Parse {
            kind: "arm status",
            value: other.to_string(),
        }),
    }
}

pub fn encode_flight_mode(mode: &FlightMode) -> Bytes {
    encode_text(&mode.to_string())
}

pub fn decode_flight_mode(payload: &[u8]) -> Result<FlightMode, CodecError> {
    decode_text(payload).map(FlightMode::from)
}

pub fn encode_altitude(altitude_m: f64) -> Bytes {
    encode_text(&altitude_m.to_string())
}

pub fn decode_altitude(payload: &[u8]) -> Result<f64, CodecError> {
    let text = decode_text(payload)?;
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CodecError::Parse {
            kind: "altitude",
            value: text.to_string(),
        })
}
