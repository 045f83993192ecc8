//! Payload encoding for blob-backed entries

use super::table::Table;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bumped whenever the persisted layout of [`Table`] changes
pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Serialize)]
struct PayloadRef<'a> {
    version: u32,
    table: &'a Table,
}

#[derive(Deserialize)]
struct PayloadOwned {
    version: u32,
    table: Table,
}

/// Serialize a sanitized table to bytes
pub fn encode(table: &Table) -> Result<Vec<u8>> {
    if table.needs_sanitizing() {
        return Err(AppError::Validation(
            "table must be sanitized before encoding".to_string(),
        ));
    }
    let bytes = serde_json::to_vec(&PayloadRef {
        version: PAYLOAD_VERSION,
        table,
    })?;
    Ok(bytes)
}

/// Reconstruct a table; every failure maps to [`AppError::Deserialization`]
pub fn decode(bytes: &[u8]) -> Result<Table> {
    let payload: PayloadOwned = serde_json::from_slice(bytes)
        .map_err(|e| AppError::Deserialization(format!("malformed payload: {}", e)))?;

    if payload.version != PAYLOAD_VERSION {
        return Err(AppError::Deserialization(format!(
            "payload version {} (expected {})",
            payload.version, PAYLOAD_VERSION
        )));
    }

    if payload.table.needs_sanitizing() {
        return Err(AppError::Deserialization(
            "payload contains unsanitized values".to_string(),
        ));
    }

    // serde does not check row widths
    let (columns, rows) = payload.table.into_parts();
    Table::from_rows(columns, rows).map_err(|e| AppError::Deserialization(e.to_string()))
}

/// Hex SHA-256 of the encoded payload
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
