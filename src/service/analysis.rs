use futures::future::join_all;
use tracing::warn;

use super::ExplorerService;
use crate::blockchain::models::{Transaction, TxInput};
use crate::cache::CacheKey;
use crate::db::Partition;
use crate::models::{InputAnalysis, TxAnalysis, TxKind};

impl ExplorerService {
    /// Direction and net effect of `tx` for `address`
    pub async fn analyze_transaction_for_address(&self, tx: &Transaction, address: &str) -> TxAnalysis {
        let key = CacheKey::TxAnalysis {
            txid: tx.txid.clone(),
            address: address.to_string(),
        }
        .to_string();

        if let Some(cached) = self.client.load(Partition::Results, &key).await {
            return cached.value;
        }

        let mut received = false;
        let mut output_amount = 0.0;
        for out in tx.vout.iter().filter(|out| out.pays_to(address)) {
            received = true;
            output_amount += out.value;
        }

        let inputs = tx
            .vin
            .iter()
            .filter(|input| !input.is_coinbase())
            .map(|input| self.analyze_input(input, address));

        let mut sent = false;
        let mut input_amount = 0.0;
        let mut resolved = true;
        for input in join_all(inputs).await {
            match input {
                Some(input) if input.is_input => {
                    sent = true;
                    input_amount += input.input_amount;
                }
                Some(_) => {}
                None => resolved = false,
            }
        }

        let kind = match (sent, received) {
            (true, true) => TxKind::SelfTransfer,
            (true, false) => TxKind::Sent,
            (false, true) => TxKind::Received,
            (false, false) => TxKind::Unknown,
        };

        let analysis = TxAnalysis {
            kind,
            balance_change: output_amount - input_amount,
        };
        // Provisional while any input is unread
        if resolved {
            self.client.save(Partition::Results, &key, &analysis).await;
        }

        analysis
    }

    /// `None` when the previous transaction could not be read
    async fn analyze_input(&self, input: &TxInput, address: &str) -> Option<InputAnalysis> {
        let (Some(prev_txid), Some(prev_vout)) = (input.txid.as_deref(), input.vout) else {
            return Some(InputAnalysis::default());
        };

        let key = CacheKey::InputAnalysis {
            txid: prev_txid.to_string(),
            vout: prev_vout,
            address: address.to_string(),
        }
        .to_string();

        if let Some(cached) = self.client.load(Partition::Results, &key).await {
            return Some(cached.value);
        }

        let prev = match self.get_transaction_details(prev_txid).await {
            Ok(details) => details.tx,
            Err(e) => {
                warn!("Error getting previous transaction {}: {}", prev_txid, e);
                return None;
            }
        };

        let analysis = prev
            .vout
            .get(prev_vout as usize)
            .filter(|out| out.pays_to(address))
            .map(|out| InputAnalysis {
                is_input: true,
                input_amount: out.value,
            })
            .unwrap_or_default();

        self.client.save(Partition::Results, &key, &analysis).await;
        Some(analysis)
    }
}
