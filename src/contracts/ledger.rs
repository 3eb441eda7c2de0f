// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Proof ledger lookups for checkpoint recovery
//!
//! Recovery trusts a checkpoint only if its proof hash equals the hash the
//! host settled on-chain for the same `(sessionId, checkpointIndex)`.
//! Ledger failures are transient; they never count as verification failures.

use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Invalid session id '{0}': expected decimal uint256")]
    InvalidSessionId(String),
    #[error("Failed to decode ledger response: {0}")]
    Decode(String),
    #[error("Ledger configuration error: {0}")]
    Config(String),
}

#[async_trait]
pub trait ProofLedger: Send + Sync {
    /// Settled proof hash for a checkpoint, `None` if nothing was submitted
    async fn proof_hash_at(
        &self,
        session_id: &str,
        checkpoint_index: u32,
    ) -> Result<Option<[u8; 32]>, LedgerError>;

    /// Host assigned to the session (lowercase `0x` address), if known
    async fn session_host(&self, session_id: &str) -> Result<Option<String>, LedgerError>;
}

/// In-memory ledger for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct MockProofLedger {
    proofs: Arc<RwLock<HashMap<(String, u32), [u8; 32]>>>,
    hosts: Arc<RwLock<HashMap<String, String>>>,
    next_error: Arc<RwLock<Option<LedgerError>>>,
}

impl MockProofLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_proof(&self, session_id: &str, checkpoint_index: u32, proof_hash: [u8; 32]) {
        self.proofs
            .write()
            .await
            .insert((session_id.to_string(), checkpoint_index), proof_hash);
    }

    pub async fn set_session_host(&self, session_id: &str, host_address: &str) {
        self.hosts
            .write()
            .await
            .insert(session_id.to_string(), host_address.to_lowercase());
    }

    /// Fail the next query with `error`
    pub async fn fail_next(&self, error: LedgerError) {
        *self.next_error.write().await = Some(error);
    }

    async fn take_error(&self) -> Result<(), LedgerError> {
        match self.next_error.write().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProofLedger for MockProofLedger {
    async fn proof_hash_at(
        &self,
        session_id: &str,
        checkpoint_index: u32,
    ) -> Result<Option<[u8; 32]>, LedgerError> {
        self.take_error().await?;
        Ok(self
            .proofs
            .read()
            .await
            .get(&(session_id.to_string(), checkpoint_index))
            .copied())
    }

    async fn session_host(&self, session_id: &str) -> Result<Option<String>, LedgerError> {
        self.take_error().await?;
        Ok(self.hosts.read().await.get(session_id).cloned())
    }
}

/// Read-only JobMarketplace queries over JSON-RPC `eth_call`
pub struct Web3ProofLedger {
    provider: Arc<Provider<Http>>,
    marketplace: Address,
}

impl Web3ProofLedger {
    pub fn new(rpc_url: &str, marketplace_address: &str) -> Result<Self, LedgerError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| LedgerError::Config(format!("Failed to create provider: {}", e)))?;

        let marketplace = marketplace_address.parse::<Address>().map_err(|e| {
            LedgerError::Config(format!("Invalid JobMarketplace address: {}", e))
        })?;

        Ok(Self {
            provider: Arc::new(provider),
            marketplace,
        })
    }

    fn parse_session_id(session_id: &str) -> Result<U256, LedgerError> {
        U256::from_dec_str(session_id)
            .map_err(|_| LedgerError::InvalidSessionId(session_id.to_string()))
    }

    async fn eth_call(&self, signature: &str, args: &[Token]) -> Result<Bytes, LedgerError> {
        let data = encode_call(signature, args);
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.marketplace)
            .data(data)
            .into();

        debug!("[LEDGER] eth_call {} on {:?}", signature, self.marketplace);

        self.provider
            .call(&tx, None)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }
}

/// selector(signature) ++ abi.encode(args)
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let selector = ethers::utils::keccak256(signature.as_bytes());
    let mut data = selector[0..4].to_vec();
    data.extend_from_slice(&ethers::abi::encode(args));
    data
}

#[async_trait]
impl ProofLedger for Web3ProofLedger {
    async fn proof_hash_at(
        &self,
        session_id: &str,
        checkpoint_index: u32,
    ) -> Result<Option<[u8; 32]>, LedgerError> {
        let session = Self::parse_session_id(session_id)?;
        let output = self
            .eth_call(
                "getProofSubmission(uint256,uint256)",
                &[Token::Uint(session), Token::Uint(U256::from(checkpoint_index))],
            )
            .await?;

        // first word of the returned submission is the proof hash
        let tokens = ethers::abi::decode(&[ParamType::FixedBytes(32)], output.get(..32).unwrap_or(&[]))
            .map_err(|e| LedgerError::Decode(e.to_string()))?;

        match tokens.into_iter().next() {
            Some(Token::FixedBytes(bytes)) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok((hash != [0u8; 32]).then_some(hash))
            }
            other => Err(LedgerError::Decode(format!(
                "unexpected proof hash token: {:?}",
                other
            ))),
        }
    }

    async fn session_host(&self, session_id: &str) -> Result<Option<String>, LedgerError> {
        let session = Self::parse_session_id(session_id)?;
        let output = self
            .eth_call("getSessionHost(uint256)", &[Token::Uint(session)])
            .await?;

        let tokens = ethers::abi::decode(&[ParamType::Address], &output)
            .map_err(|e| LedgerError::Decode(e.to_string()))?;

        match tokens.into_iter().next() {
            Some(Token::Address(address)) if address != Address::zero() => {
                Ok(Some(format!("{:#x}", address)))
            }
            Some(Token::Address(_)) => Ok(None),
            other => Err(LedgerError::Decode(format!(
                "unexpected host token: {:?}",
                other
            ))),
        }
    }
}
