pub mod settlement_writer;
pub mod transaction_reader;
