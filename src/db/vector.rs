//! Vector BLOB codec and the distance functions SQLite ranks with.
//!
//! Vectors are stored as packed little-endian `f32`. The two distance
//! operators are registered on every connection as deterministic scalar
//! functions, `l2_distance(a, b)` and `cosine_distance(a, b)`, so ordering and
//! `LIMIT` happen inside the store.

use rusqlite::Connection;
use rusqlite::functions::{Context, FunctionFlags};

use crate::config::DistanceMetric;
use crate::error::StoreError;

pub(crate) const CODEC_ERROR_TAG: &str = "vector codec";

impl DistanceMetric {
    pub(crate) fn sql_function(self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "l2_distance",
            DistanceMetric::Cosine => "cosine_distance",
        }
    }

    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::Euclidean => l2_distance(a, b),
            DistanceMetric::Cosine => cosine_distance(a, b),
        }
    }
}

pub fn encode(vector: &[f32]) -> Result<Vec<u8>, StoreError> {
    if let Some(pos) = vector.iter().position(|x| !x.is_finite()) {
        return Err(StoreError::Encoding(format!(
            "component {pos} is not a finite number"
        )));
    }
    Ok(vector.iter().flat_map(|x| x.to_le_bytes()).collect())
}

pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    decode_bytes(bytes).map_err(StoreError::Encoding)
}

fn decode_bytes(bytes: &[u8]) -> Result<Vec<f32>, String> {
    if bytes.len() % 4 != 0 {
        return Err(format!(
            "{CODEC_ERROR_TAG}: blob of {} bytes is not a packed f32 vector",
            bytes.len()
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// `1 - cos(a, b)`. A zero vector has no direction, so it sits at 1.0 from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na.sqrt() * nb.sqrt())
}

pub(crate) fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    for metric in [DistanceMetric::Euclidean, DistanceMetric::Cosine] {
        conn.create_scalar_function(
            metric.sql_function(),
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            move |ctx| {
                let a = blob_arg(ctx, 0)?;
                let b = blob_arg(ctx, 1)?;
                if a.len() != b.len() {
                    return Err(codec_error(format!(
                        "{CODEC_ERROR_TAG}: cannot compare {} and {} dimensions",
                        a.len(),
                        b.len()
                    )));
                }
                Ok(metric.distance(&a, &b))
            },
        )?;
    }
    Ok(())
}

fn blob_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Vec<f32>> {
    let bytes = ctx
        .get_raw(idx)
        .as_blob()
        .map_err(|e| codec_error(format!("{CODEC_ERROR_TAG}: argument {idx}: {e}")))?;
    decode_bytes(bytes).map_err(codec_error)
}

fn codec_error(msg: String) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(msg.into())
}
