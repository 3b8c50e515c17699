//! Decoding of partially signed transactions into [`DecodedPsbt`].

use crate::{
    error::ValidationError,
    types::{DecodedPsbt, InputInfo, OutputInfo, TxFeatures},
};
use bitcoin::{Address, Network, Psbt, Script, ScriptBuf, Transaction, TxOut, Witness, psbt};

/// Turns raw PSBT bytes into the structured model shown on the approval screen.
///
/// Decoding is local and deterministic. Fee recommendations and risk verdicts are left at
/// their neutral values, see [`DecodedPsbt::with_assessment`].
#[derive(Clone, Copy, Debug)]
pub struct PsbtDecoder {
    network: Network,
}

impl PsbtDecoder {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Decodes a hex encoded PSBT.
    pub fn decode_hex(&self, raw: &str) -> Result<DecodedPsbt, ValidationError> {
        let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
            .map_err(|err| ValidationError::MalformedPsbt(err.to_string()))?;
        self.decode(&bytes)
    }

    /// Decodes serialized PSBT bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedPsbt, ValidationError> {
        let psbt =
            Psbt::deserialize(bytes).map_err(|err| ValidationError::MalformedPsbt(err.to_string()))?;
        self.decode_psbt(&psbt)
    }

    pub fn decode_psbt(&self, psbt: &Psbt) -> Result<DecodedPsbt, ValidationError> {
        let tx = &psbt.unsigned_tx;

        let mut inputs = Vec::with_capacity(tx.input.len());
        let mut signed_tx = tx.clone();
        for (index, (txin, input)) in tx.input.iter().zip(&psbt.inputs).enumerate() {
            let prevout = match (&input.witness_utxo, &input.non_witness_utxo) {
                (Some(utxo), _) => utxo,
                (None, Some(prev_tx)) => prev_tx
                    .output
                    .get(txin.previous_output.vout as usize)
                    .ok_or(ValidationError::MissingUtxo { index })?,
                (None, None) => return Err(ValidationError::MissingUtxo { index }),
            };
            fill_signature_data(&mut signed_tx.input[index], input, &prevout.script_pubkey);
            inputs.push(InputInfo {
                address: self.address_of(&prevout.script_pubkey),
                value_sats: prevout.value.to_sat(),
                sighash_type: input.sighash_type.map(|ty| ty.to_u32()),
            });
        }

        let outputs = tx
            .output
            .iter()
            .map(|TxOut { value, script_pubkey }| OutputInfo {
                address: self.address_of(script_pubkey),
                value_sats: value.to_sat(),
            })
            .collect::<Vec<_>>();

        let fee_sats = crate::types::implied_fee(&inputs, &outputs)?;
        let vsize = signed_vsize(&signed_tx);
        let fee_rate = fee_sats as f64 / vsize as f64;

        trace!(
            target: "review",
            inputs = inputs.len(),
            outputs = outputs.len(),
            fee_sats,
            vsize,
            "decoded psbt"
        );

        Ok(DecodedPsbt {
            inputs,
            outputs,
            fee_sats,
            fee_rate,
            recommended_fee_rate: 0.0,
            features: TxFeatures { rbf: tx.input.iter().any(|txin| txin.sequence.is_rbf()) },
            risks: Vec::new(),
            is_scammer: false,
        })
    }

    fn address_of(&self, script: &Script) -> Option<String> {
        Address::from_script(script, self.network).ok().map(|address| address.to_string())
    }
}

/// Size of a DER signature with its sighash byte, at its usual maximum.
const ECDSA_SIG_LEN: usize = 72;
const SCHNORR_SIG_LEN: usize = 64;
const COMPRESSED_KEY_LEN: usize = 33;
/// `OP_PUSHBYTES_22 <P2WPKH script>` redeeming a nested segwit output.
const NESTED_P2WPKH_SCRIPT_SIG_LEN: usize = 23;

/// Puts the input's final scripts in place, or same sized placeholders for the
/// signature data the input will carry once signed.
fn fill_signature_data(txin: &mut bitcoin::TxIn, input: &psbt::Input, spent: &Script) {
    if input.final_script_sig.is_some() || input.final_script_witness.is_some() {
        txin.script_sig = input.final_script_sig.clone().unwrap_or_default();
        txin.witness = input.final_script_witness.clone().unwrap_or_default();
        return;
    }

    let placeholder = |len: usize| vec![0u8; len];
    if spent.is_p2tr() {
        // a non default sighash is appended to the signature
        let len = match input.sighash_type.map(|ty| ty.to_u32()) {
            None | Some(0) => SCHNORR_SIG_LEN,
            Some(_) => SCHNORR_SIG_LEN + 1,
        };
        txin.witness = Witness::from_slice(&[placeholder(len)]);
    } else if spent.is_p2pkh() {
        let mut script_sig = Vec::with_capacity(2 + ECDSA_SIG_LEN + COMPRESSED_KEY_LEN);
        script_sig.push(ECDSA_SIG_LEN as u8);
        script_sig.extend(placeholder(ECDSA_SIG_LEN));
        script_sig.push(COMPRESSED_KEY_LEN as u8);
        script_sig.extend(placeholder(COMPRESSED_KEY_LEN));
        txin.script_sig = ScriptBuf::from_bytes(script_sig);
    } else {
        if spent.is_p2sh() {
            txin.script_sig = ScriptBuf::from_bytes(placeholder(NESTED_P2WPKH_SCRIPT_SIG_LEN));
        }
        // P2WPKH, and the assumed shape of anything not recognized
        txin.witness =
            Witness::from_slice(&[placeholder(ECDSA_SIG_LEN), placeholder(COMPRESSED_KEY_LEN)]);
    }
}

fn signed_vsize(tx: &Transaction) -> usize {
    tx.vsize().max(1)
}

impl Default for PsbtDecoder {
    fn default() -> Self {
        Self::new(Network::Bitcoin)
    }
}
