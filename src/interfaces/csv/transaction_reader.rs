use crate::domain::transaction::Transaction;
use crate::error::{Result, SettlementError};
use std::io::Read;

/// Reads transactions from a CSV source.
///
/// Expects the header `id,order_id,merchant_id,amount,fee,status,paid_at`
/// with `paid_at` in RFC 3339. Whitespace around fields is trimmed.
pub struct TransactionReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> TransactionReader<R> {
    /// Creates a new `TransactionReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes transactions.
    ///
    /// A malformed row yields an `Err` item and does not stop the iteration.
    pub fn transactions(self) -> impl Iterator<Item = Result<Transaction>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(SettlementError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::domain::transaction::TransactionStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "id, order_id, merchant_id, amount, fee, status, paid_at\n\
                    t1, o1, m1, 1000, 25, PAID, 2024-03-01T10:00:00Z\n\
                    t2, o2, m2, 50.5, 1.5, PENDING, 2024-03-02T11:30:00+00:00";
        let reader = TransactionReader::new(data.as_bytes());
        let results: Vec<Result<Transaction>> = reader.transactions().collect();

        assert_eq!(results.len(), 2);
        let tx1 = results[0].as_ref().unwrap();
        assert_eq!(tx1.merchant_id, "m1");
        assert_eq!(tx1.amount, Money::new(dec!(1000)));
        let tx2 = results[1].as_ref().unwrap();
        assert_eq!(tx2.status, TransactionStatus::Pending);
        assert_eq!(tx2.fee, Money::new(dec!(1.5)));
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "id,order_id,merchant_id,amount,fee,status,paid_at\n\
                    t1,o1,m1,abc,25,PAID,2024-03-01T10:00:00Z\n\
                    t2,o2,m1,10,1,SETTLED,2024-03-01T10:00:00Z\n\
                    t3,o3,m1,10,1,PAID,yesterday\n\
                    t4,o4,m1,10,1,PAID,2024-03-01T10:00:00Z";
        let reader = TransactionReader::new(data.as_bytes());
        let results: Vec<Result<Transaction>> = reader.transactions().collect();

        assert_eq!(results.len(), 4);
        assert!(results[0].is_err());
        assert!(results[1].is_err());
        assert!(results[2].is_err());
        assert!(results[3].is_ok());
    }
}
