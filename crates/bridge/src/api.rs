//! Typed wrappers for the wallet methods exposed to pages.
//!
//! Every method goes through [`Provider::request`], so all of them are serialized by the
//! request queue and wait for the page to be visible.

use crate::{error::BridgeError, provider::Provider};
use opwallet_rpc::TxType;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Optional arguments of [`Provider::send_bitcoin`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBitcoinOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memos: Option<Vec<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendBitcoinParams<'a> {
    to_address: &'a str,
    satoshis: u64,
    #[serde(flatten)]
    options: SendBitcoinOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendInscriptionParams<'a> {
    to_address: &'a str,
    inscription_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fee_rate: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRunesParams<'a> {
    to_address: &'a str,
    runeid: &'a str,
    amount: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fee_rate: Option<f64>,
}

#[derive(Serialize)]
struct Page {
    cursor: u64,
    size: u64,
}

impl Page {
    fn new(cursor: Option<u64>, size: Option<u64>) -> Self {
        Self { cursor: cursor.unwrap_or(0), size: size.unwrap_or(20) }
    }
}

fn encode(params: impl Serialize) -> Result<Value, BridgeError> {
    serde_json::to_value(params).map_err(|_| BridgeError::InvalidRequest)
}

// === impl Provider ===

impl Provider {
    /// Asks the user to connect the page and returns the approved accounts.
    pub async fn request_accounts(&self) -> Result<Vec<String>, BridgeError> {
        self.call_as("requestAccounts", Value::Null).await
    }

    pub async fn get_accounts(&self) -> Result<Vec<String>, BridgeError> {
        self.call_as("getAccounts", Value::Null).await
    }

    pub async fn disconnect(&self) -> Result<Value, BridgeError> {
        self.call("disconnect", Value::Null).await
    }

    pub async fn get_network(&self) -> Result<String, BridgeError> {
        self.call_as("getNetwork", Value::Null).await
    }

    pub async fn switch_network(&self, network: &str) -> Result<Value, BridgeError> {
        self.call("switchNetwork", json!({ "network": network })).await
    }

    pub async fn get_chain(&self) -> Result<Value, BridgeError> {
        self.call("getChain", Value::Null).await
    }

    pub async fn switch_chain(&self, chain: &str) -> Result<Value, BridgeError> {
        self.call("switchChain", json!({ "chain": chain })).await
    }

    pub async fn get_public_key(&self) -> Result<String, BridgeError> {
        self.call_as("getPublicKey", Value::Null).await
    }

    pub async fn get_balance(&self) -> Result<Value, BridgeError> {
        self.call("getBalance", Value::Null).await
    }

    /// Lists inscriptions of the current account, 20 per page unless `size` is given.
    pub async fn get_inscriptions(
        &self,
        cursor: Option<u64>,
        size: Option<u64>,
    ) -> Result<Value, BridgeError> {
        self.call("getInscriptions", encode(Page::new(cursor, size))?).await
    }

    pub async fn get_bitcoin_utxos(
        &self,
        cursor: Option<u64>,
        size: Option<u64>,
    ) -> Result<Value, BridgeError> {
        self.call("getBitcoinUtxos", encode(Page::new(cursor, size))?).await
    }

    /// Signs `text`; `kind` selects the scheme, e.g. `ecdsa` or `bip322-simple`.
    pub async fn sign_message(&self, text: &str, kind: &str) -> Result<String, BridgeError> {
        self.call_as("signMessage", json!({ "text": text, "type": kind })).await
    }

    pub async fn verify_message_of_bip322_simple(
        &self,
        address: &str,
        message: &str,
        signature: &str,
        network: Option<u32>,
    ) -> Result<Value, BridgeError> {
        let mut params =
            json!({ "address": address, "message": message, "signature": signature });
        if let Some(network) = network {
            params["network"] = json!(network);
        }
        self.call("verifyMessageOfBIP322Simple", params).await
    }

    pub async fn sign_data(&self, data: &str, kind: &str) -> Result<String, BridgeError> {
        self.call_as("signData", json!({ "data": data, "type": kind })).await
    }

    /// Sends `satoshis` to `to_address` and returns the transaction id.
    pub async fn send_bitcoin(
        &self,
        to_address: &str,
        satoshis: u64,
        options: SendBitcoinOptions,
    ) -> Result<String, BridgeError> {
        let params = SendBitcoinParams { to_address, satoshis, options };
        self.call_as(
            "sendBitcoin",
            json!({ "sendBitcoinParams": encode(params)?, "type": TxType::SendBitcoin }),
        )
        .await
    }

    pub async fn send_inscription(
        &self,
        to_address: &str,
        inscription_id: &str,
        fee_rate: Option<f64>,
    ) -> Result<Value, BridgeError> {
        let params = SendInscriptionParams { to_address, inscription_id, fee_rate };
        self.call(
            "sendInscription",
            json!({
                "sendInscriptionParams": encode(params)?,
                "type": TxType::SendOrdinalsInscription,
            }),
        )
        .await
    }

    pub async fn send_runes(
        &self,
        to_address: &str,
        runeid: &str,
        amount: &str,
        fee_rate: Option<f64>,
    ) -> Result<Value, BridgeError> {
        let params = SendRunesParams { to_address, runeid, amount, fee_rate };
        self.call("sendRunes", json!({ "sendRunesParams": encode(params)?, "type": TxType::SendRunes }))
            .await
    }

    /// Broadcasts a raw transaction.
    pub async fn push_tx(&self, rawtx: &str) -> Result<String, BridgeError> {
        self.call_as("pushTx", json!({ "rawtx": rawtx })).await
    }

    /// Asks the wallet to review and sign a PSBT; `options` is forwarded as is.
    pub async fn sign_psbt(
        &self,
        psbt_hex: &str,
        options: Option<Value>,
    ) -> Result<String, BridgeError> {
        let mut params = json!({ "psbtHex": psbt_hex, "type": TxType::SignTx });
        if let Some(options) = options {
            params["options"] = options;
        }
        self.call_as("signPsbt", params).await
    }

    pub async fn sign_psbts(
        &self,
        psbt_hexs: &[String],
        options: Option<Vec<Value>>,
    ) -> Result<Vec<String>, BridgeError> {
        let mut params = json!({ "psbtHexs": psbt_hexs });
        if let Some(options) = options {
            params["options"] = Value::Array(options);
        }
        self.call_as("multiSignPsbt", params).await
    }

    pub async fn push_psbt(&self, psbt_hex: &str) -> Result<String, BridgeError> {
        self.call_as("pushPsbt", json!({ "psbtHex": psbt_hex })).await
    }

    pub async fn inscribe_transfer(&self, ticker: &str, amount: &str) -> Result<Value, BridgeError> {
        self.call("inscribeTransfer", json!({ "ticker": ticker, "amount": amount })).await
    }

    pub async fn deploy_contract(&self, params: Value) -> Result<Value, BridgeError> {
        self.call("deployContract", params).await
    }

    /// Signs a contract interaction without broadcasting it.
    pub async fn sign_interaction(
        &self,
        interaction: Value,
        contract_info: Option<Value>,
    ) -> Result<Value, BridgeError> {
        self.call("signInteraction", interaction_params(interaction, contract_info)).await
    }

    pub async fn sign_and_broadcast_interaction(
        &self,
        interaction: Value,
        contract_info: Option<Value>,
    ) -> Result<Value, BridgeError> {
        self.call("signAndBroadcastInteraction", interaction_params(interaction, contract_info))
            .await
    }

    pub async fn broadcast(&self, transactions: Vec<Value>) -> Result<Value, BridgeError> {
        self.call("broadcast", Value::Array(transactions)).await
    }

    pub async fn wrap(&self, params: Value) -> Result<Value, BridgeError> {
        self.call("wrap", params).await
    }

    pub async fn unwrap(&self, params: Value) -> Result<Value, BridgeError> {
        self.call("unwrap", params).await
    }

    pub async fn get_version(&self) -> Result<String, BridgeError> {
        self.call_as("getVersion", Value::Null).await
    }

    pub async fn is_atomicals_enabled(&self) -> Result<bool, BridgeError> {
        self.call_as("isAtomicalsEnabled", Value::Null).await
    }
}

fn interaction_params(interaction: Value, contract_info: Option<Value>) -> Value {
    let mut params = json!({ "interactionParameters": interaction });
    if let Some(info) = contract_info {
        params["contractInfo"] = info;
    }
    params
}
