//! Data contracts between the decoder, the analyzer and the approval screen.

use crate::error::ValidationError;
use bitcoin::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A decoded transaction input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputInfo {
    /// `None` when the spent script cannot be attributed to any known address type
    pub address: Option<String>,
    #[serde(rename = "value")]
    pub value_sats: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sighash_type: Option<u32>,
}

/// A decoded transaction output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputInfo {
    pub address: Option<String>,
    #[serde(rename = "value")]
    pub value_sats: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxFeatures {
    /// Whether any input signals replace-by-fee
    pub rbf: bool,
}

/// Severity attached to a risk entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Warning,
    Danger,
    Critical,
}

/// Kinds of risk reported by the collaborator services.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskKind {
    SighashNone,
    ScammerAddress,
    InscriptionBurning,
    MultipleAssets,
    LowFeeRate,
    HighFeeRate,
    SplittingInscriptions,
    MergingInscriptions,
    ChangingInscription,
    RunesBurning,
    RunesMultiple,
    #[serde(untagged)]
    Other(String),
}

/// An explicit risk entry supplied alongside a decoded transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Risk {
    #[serde(rename = "type")]
    pub kind: RiskKind,
    pub level: RiskLevel,
    pub title: String,
    #[serde(rename = "desc")]
    pub description: String,
}

/// A partially signed transaction decoded into what the user is asked to approve.
///
/// `recommended_fee_rate`, `risks` and `is_scammer` come from collaborator services; a
/// locally decoded transaction carries their neutral values until a [`RiskAssessment`] is
/// applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedPsbt {
    #[serde(rename = "inputInfos")]
    pub inputs: Vec<InputInfo>,
    #[serde(rename = "outputInfos")]
    pub outputs: Vec<OutputInfo>,
    #[serde(rename = "fee")]
    pub fee_sats: u64,
    /// sat/vB
    pub fee_rate: f64,
    /// sat/vB
    pub recommended_fee_rate: f64,
    pub features: TxFeatures,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub is_scammer: bool,
}

impl DecodedPsbt {
    pub fn input_total(&self) -> u64 {
        sum(self.inputs.iter().map(|input| input.value_sats))
    }

    pub fn output_total(&self) -> u64 {
        sum(self.outputs.iter().map(|output| output.value_sats))
    }

    /// Returns `inputs - outputs`, rejecting transactions that create value.
    pub fn implied_fee(&self) -> Result<u64, ValidationError> {
        implied_fee(&self.inputs, &self.outputs)
    }

    /// Returns the set of explicit risk kinds.
    pub fn risk_flags(&self) -> BTreeSet<RiskKind> {
        self.risks.iter().map(|risk| risk.kind.clone()).collect()
    }

    /// Merges the verdict of the collaborator services.
    pub fn with_assessment(mut self, assessment: RiskAssessment) -> Self {
        self.recommended_fee_rate = assessment.recommended_fee_rate;
        self.risks = assessment.risks;
        self.is_scammer = assessment.is_scammer;
        self
    }
}

/// Fee recommendation and risk verdict produced outside of the analyzer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub recommended_fee_rate: f64,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub is_scammer: bool,
}

impl Default for RiskAssessment {
    fn default() -> Self {
        Self { recommended_fee_rate: 1.0, risks: Vec::new(), is_scammer: false }
    }
}

/// Kind of keyring holding the account key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyringKind {
    /// Keys are held by the extension itself.
    #[default]
    Local,
    /// Keys live on a hardware or air-gapped device that signs out of band.
    External,
}

impl KeyringKind {
    pub const fn is_external(&self) -> bool {
        matches!(self, Self::External)
    }
}

/// The account the transaction is reviewed for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountContext {
    pub address: String,
    pub public_key: PublicKey,
    #[serde(default)]
    pub keyring: KeyringKind,
}

impl AccountContext {
    pub fn new(address: impl Into<String>, public_key: PublicKey) -> Self {
        Self { address: address.into(), public_key, keyring: KeyringKind::Local }
    }

    pub fn with_keyring(mut self, keyring: KeyringKind) -> Self {
        self.keyring = keyring;
        self
    }

    /// Returns true if `address` belongs to this account.
    pub fn owns(&self, address: Option<&str>) -> bool {
        address == Some(self.address.as_str())
    }
}

/// An input the local key must produce a signature for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToSignInput {
    pub index: usize,
    pub public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sighash_types: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_tweak_signer: Option<bool>,
}

/// Page supplied options of a `signPsbt` request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPsbtOptions {
    #[serde(default = "default_auto_finalized")]
    pub auto_finalized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_sign_inputs: Option<Vec<ToSignInputOption>>,
}

fn default_auto_finalized() -> bool {
    true
}

/// One entry of [`SignPsbtOptions::to_sign_inputs`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToSignInputOption {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sighash_types: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_tweak_signer: Option<bool>,
}

/// Returns `sum(inputs) - sum(outputs)`.
pub fn implied_fee(inputs: &[InputInfo], outputs: &[OutputInfo]) -> Result<u64, ValidationError> {
    let inputs = sum(inputs.iter().map(|input| input.value_sats));
    let outputs = sum(outputs.iter().map(|output| output.value_sats));
    inputs.checked_sub(outputs).ok_or(ValidationError::NegativeFee { inputs, outputs })
}

fn sum(values: impl Iterator<Item = u64>) -> u64 {
    values.fold(0u64, |acc, value| acc.saturating_add(value))
}
