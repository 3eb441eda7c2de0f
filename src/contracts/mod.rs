pub mod ledger;

pub use ledger::{LedgerError, MockProofLedger, ProofLedger, Web3ProofLedger};
