//! Voucher batch export
//!
//! Renders vouchers for distribution to vendors: CSV (with header), plain
//! text with one code per line, or a JSON array for vendor systems. Amounts
//! are shown in major units.

use crate::{
    types::{ExportFormat, Voucher},
    Error, Result,
};
use chrono::{DateTime, Utc};
use ledger_core::Amount;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// One exported voucher
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    code: &'a str,
    amount: Decimal,
    vendor: &'a str,
    batch_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// Amount in major units of the platform currency
pub fn major_units(amount: Amount, scale: u32) -> Decimal {
    Decimal::from_i128_with_scale(amount.minor() as i128, scale)
}

/// Render vouchers in the requested format
pub fn render(vouchers: &[Voucher], format: ExportFormat, scale: u32) -> Result<String> {
    match format {
        ExportFormat::Csv => render_csv(vouchers, scale),
        ExportFormat::Text => Ok(render_text(vouchers)),
        ExportFormat::Json => render_json(vouchers, scale),
    }
}

fn render_json(vouchers: &[Voucher], scale: u32) -> Result<String> {
    let rows: Vec<ExportRow<'_>> = vouchers
        .iter()
        .map(|voucher| ExportRow {
            code: voucher.code.as_str(),
            amount: major_units(voucher.amount, scale),
            vendor: &voucher.vendor,
            batch_id: voucher.batch_id,
            expires_at: voucher.expires_at,
        })
        .collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}

fn render_csv(vouchers: &[Voucher], scale: u32) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["code", "amount", "vendor", "batch_id", "expires_at"])?;

    for voucher in vouchers {
        let amount = major_units(voucher.amount, scale).to_string();
        let batch_id = voucher.batch_id.to_string();
        let expires_at = voucher.expires_at.to_rfc3339();
        writer.write_record([
            voucher.code.as_str(),
            amount.as_str(),
            voucher.vendor.as_str(),
            batch_id.as_str(),
            expires_at.as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Serialization(format!("Failed to flush CSV: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| Error::Serialization(e.to_string()))
}

fn render_text(vouchers: &[Voucher]) -> String {
    let mut content = String::with_capacity(vouchers.len() * 11);
    for voucher in vouchers {
        content.push_str(voucher.code.as_str());
        content.push('\n');
    }
    content
}
