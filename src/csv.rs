use std::io;

use color_eyre::eyre::{Result, eyre};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{domain::props::TransactionStatus, query::transaction::TransactionView};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CsvRequestRecord {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub account: Uuid,
    pub target: Option<Uuid>,
    pub transfer_type: Option<i64>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub holder: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Open,
    Deactivate,
    Reactivate,
    Transfer,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CsvTransactionReport {
    pub transaction: Uuid,
    pub source: Uuid,
    pub target: Uuid,
    pub transfer_type: i64,
    pub value: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub reason: Option<String>,
}

impl From<&TransactionView> for CsvTransactionReport {
    fn from(view: &TransactionView) -> Self {
        CsvTransactionReport {
            transaction: view.transaction_id,
            source: view.source_account_id,
            target: view.target_account_id,
            transfer_type: view.transfer_type_id,
            value: view.value,
            currency: view.currency.clone(),
            status: view.status,
            reason: view.reason.clone(),
        }
    }
}

pub fn read_input<D: serde::de::DeserializeOwned>(
    file_path: &str,
) -> Result<impl Iterator<Item = Result<D>>> {
    let reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(file_path)
        .map_err(|e| eyre!("Could not read input file: {}", e))?;

    Ok(reader
        .into_deserialize()
        .map(|r| r.map_err(|ee| eyre!("Error parsing row: {}", ee))))
}

pub fn write_report<W: io::Write>(views: &[TransactionView], out: W) -> Result<()> {
    let mut csv_writer = WriterBuilder::new().from_writer(out);

    for view in views {
        csv_writer.serialize(CsvTransactionReport::from(view))?;
    }
    csv_writer.flush()?;

    Ok(())
}
