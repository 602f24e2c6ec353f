use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_client::GetConfirmedSignaturesForAddress2Config,
};
use solana_sdk::{
    pubkey::Pubkey, signature::Keypair, signature::Signature, signer::Signer,
    system_instruction, transaction::Transaction,
};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Backoff schedule for rate-limited RPC calls, in milliseconds.
const RPC_BACKOFF_MS: [u64; 3] = [500, 1000, 2000];

/// Thin wrapper around the Solana JSON-RPC client: balance reads with
/// rate-limit backoff, signature lookups, and signed transfers.
#[derive(Clone)]
pub struct SolanaRpc {
    client: Arc<RpcClient>,
}

impl SolanaRpc {
    pub fn new(rpc_url: String) -> Self {
        Self {
            client: Arc::new(RpcClient::new(rpc_url)),
        }
    }

    /// On-chain balance in lamports, retrying through 429/rate responses.
    pub async fn balance_lamports(&self, pubkey: &Pubkey) -> Result<u64> {
        let mut last_err = None;
        for (attempt, backoff_ms) in RPC_BACKOFF_MS.iter().enumerate() {
            match self.client.get_balance(pubkey).await {
                Ok(balance) => return Ok(balance),
                Err(e) => {
                    let text = e.to_string();
                    if !is_rate_limit_text(&text) {
                        return Err(AppError::Rpc(text));
                    }
                    tracing::debug!(
                        "RPC rate limited reading {} (attempt {}), backing off {}ms",
                        pubkey,
                        attempt + 1,
                        backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
                    last_err = Some(text);
                }
            }
        }
        tracing::warn!(
            "RPC still rate limited after {} attempts: {:?}",
            RPC_BACKOFF_MS.len(),
            last_err
        );
        Err(AppError::RpcRateLimited)
    }

    /// Most recent transaction signature touching this address, for
    /// explorer links in purchase logs. Best-effort.
    pub async fn latest_signature(&self, pubkey: &Pubkey) -> Option<String> {
        let config = GetConfirmedSignaturesForAddress2Config {
            limit: Some(5),
            ..Default::default()
        };
        match self
            .client
            .get_signatures_for_address_with_config(pubkey, config)
            .await
        {
            Ok(signatures) => signatures.first().map(|s| s.signature.clone()),
            Err(e) => {
                tracing::debug!("Could not fetch signatures for {}: {}", pubkey, e);
                None
            }
        }
    }

    /// Signs and submits a system transfer of `lamports` from `from` to
    /// `to` with a fresh blockhash.
    pub async fn transfer(
        &self,
        from: &Keypair,
        to: &Pubkey,
        lamports: u64,
    ) -> Result<Signature> {
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| AppError::Rpc(format!("blockhash: {}", e)))?;

        let instruction = system_instruction::transfer(&from.pubkey(), to, lamports);
        let tx = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&from.pubkey()),
            &[from],
            blockhash,
        );

        self.client
            .send_transaction(&tx)
            .await
            .map_err(|e| AppError::Rpc(format!("send: {}", e)))
    }
}

fn is_rate_limit_text(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("429") || lower.contains("rate")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_classification_by_substring() {
        assert!(is_rate_limit_text("HTTP status client error (429)"));
        assert!(is_rate_limit_text("Too many requests, rate limited"));
        assert!(!is_rate_limit_text("connection refused"));
    }
}
