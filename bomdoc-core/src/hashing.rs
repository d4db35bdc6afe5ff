//! Hashing - SHA-256 for Artifacts and Jobs
//!
//! The job hash identifies a run by its inputs; identical inputs give an
//! identical job hash regardless of map ordering.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::assets::AssetSet;
use crate::kit::KitDescriptor;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&sorted(serde_json::to_value(value)?))
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

#[derive(Serialize)]
struct JobInputs<'a> {
    kit: &'a KitDescriptor,
    templates: &'a [&'a str],
    logo_sha256: String,
    qr_sha256: String,
    engine_version: &'a str,
}

/// job_hash = sha256(canonical {kit, template ids in page order, asset digests, engine version})
pub fn compute_job_hash(
    kit: &KitDescriptor,
    templates: &[&str],
    assets: &AssetSet,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let inputs = JobInputs {
        kit,
        templates,
        logo_sha256: sha256_hex(&assets.logo.bytes),
        qr_sha256: sha256_hex(&assets.qr.bytes),
        engine_version,
    };
    Ok(sha256_hex(canonical_json(&inputs)?.as_bytes()))
}
