use crate::domain::settlement::SettlementAggregate;
use crate::error::{Result, SettlementError};
use std::io::Write;

pub const HEADER: [&str; 6] = ["merchant_id", "date", "gross", "fee", "net", "txn_count"];

/// Writes a job's aggregate as the downloadable settlement report.
///
/// One row per merchant/day, in the aggregate's key order. The header is
/// always written, so an empty aggregate produces a header-only file.
pub struct SettlementWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> SettlementWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_aggregate(&mut self, aggregate: &SettlementAggregate) -> Result<()> {
        self.writer.write_record(HEADER)?;
        for (key, totals) in aggregate.iter() {
            self.writer.write_record([
                key.merchant_id.clone(),
                key.date.format("%Y-%m-%d").to_string(),
                totals.gross.to_string(),
                totals.fee.to_string(),
                totals.net.to_string(),
                totals.count.to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| SettlementError::Io(e.into_error()))
    }
}

/// Renders an aggregate into CSV bytes.
pub fn render(aggregate: &SettlementAggregate) -> Result<Vec<u8>> {
    let mut writer = SettlementWriter::new(Vec::new());
    writer.write_aggregate(aggregate)?;
    writer.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::domain::transaction::{Transaction, TransactionStatus};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_aggregate_is_header_only() {
        let bytes = render(&SettlementAggregate::new()).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "merchant_id,date,gross,fee,net,txn_count\n"
        );
    }

    #[test]
    fn test_rows_follow_key_order() {
        let mut aggregate = SettlementAggregate::new();
        for (id, merchant, day, amount) in [
            ("t1", "m2", 1, dec!(10)),
            ("t2", "m1", 2, dec!(20.50)),
            ("t3", "m1", 2, dec!(4.50)),
        ] {
            aggregate.record(&Transaction {
                id: id.to_string(),
                order_id: "o".to_string(),
                merchant_id: merchant.to_string(),
                amount: Money::new(amount),
                fee: Money::new(dec!(1)),
                status: TransactionStatus::Paid,
                paid_at: Utc.with_ymd_and_hms(2024, 2, day, 8, 0, 0).unwrap(),
            });
        }

        let out = String::from_utf8(render(&aggregate).unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                "merchant_id,date,gross,fee,net,txn_count",
                "m1,2024-02-02,25,2,23,2",
                "m2,2024-02-01,10,1,9,1",
            ]
        );
    }
}
