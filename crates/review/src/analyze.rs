//! Transaction analysis: balance deltas, signable inputs and risk flags.

use crate::{
    decode::PsbtDecoder,
    error::ValidationError,
    signers,
    types::{AccountContext, DecodedPsbt, RiskKind, SignPsbtOptions, ToSignInput},
};
use opwallet_config::ReviewConfig;
use opwallet_rpc::TxType;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};

/// `SIGHASH_ALL`
const SIGHASH_ALL: u32 = 1;

/// What a transaction does to the balance of the reviewed account.
///
/// `spend` and `balance_change` are signed: a transaction that returns more to the account
/// than it takes yields negative spend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSummary {
    /// owned inputs minus owned outputs
    pub spend: i64,
    /// sum of owned inputs
    pub sending: u64,
    /// sum of owned outputs
    pub receiving: u64,
    /// `receiving - sending`
    pub balance_change: i64,
}

/// Direction of a fee rate that deviates sharply from the recommendation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeeRateWarning {
    TooLow,
    TooHigh,
}

impl FeeRateWarning {
    /// The tooltip shown next to the fee rate.
    pub fn message(&self, recommended_fee_rate: f64) -> String {
        let direction = match self {
            Self::TooLow => "lower",
            Self::TooHigh => "higher",
        };
        format!(
            "The fee rate is much {direction} than recommended fee rate ({recommended_fee_rate} sat/vB)"
        )
    }
}

/// The full review model consumed by the approval screen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReview {
    pub kind: TxType,
    pub decoded: DecodedPsbt,
    pub to_sign_inputs: Vec<ToSignInput>,
    pub balance: BalanceSummary,
    /// False if an account input can still be modified after signing, in which case the
    /// fee panels must be shown.
    pub can_changed: bool,
    pub fee_rate_warning: Option<FeeRateWarning>,
    pub risk_flags: BTreeSet<RiskKind>,
    pub is_scam_flagged: bool,
}

impl TxReview {
    /// A review can be confirmed only if it has inputs and something to sign.
    pub fn is_valid(&self) -> bool {
        !self.decoded.inputs.is_empty() && !self.to_sign_inputs.is_empty()
    }

    pub fn ensure_valid(&self) -> Result<(), ValidationError> {
        if self.is_valid() { Ok(()) } else { Err(ValidationError::NothingToSign) }
    }

    pub fn show_fee_details(&self) -> bool {
        !self.can_changed
    }

    pub fn requires_risk_acknowledgement(&self) -> bool {
        !self.risk_flags.is_empty()
    }

    /// The tooltip for [`Self::fee_rate_warning`], if any.
    pub fn fee_rate_message(&self) -> Option<String> {
        self.fee_rate_warning.map(|warning| warning.message(self.decoded.recommended_fee_rate))
    }
}

impl fmt::Display for TxReview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inputs, {} outputs, fee {} sats ({:.2} sat/vB), spend {} sats, signing {} inputs",
            self.decoded.inputs.len(),
            self.decoded.outputs.len(),
            self.decoded.fee_sats,
            self.decoded.fee_rate,
            self.balance.spend,
            self.to_sign_inputs.len()
        )
    }
}

/// Analyzes a decoded transaction for `account`.
///
/// This is a pure function of its arguments.
pub fn analyze(
    decoded: &DecodedPsbt,
    account: &AccountContext,
    kind: TxType,
    options: Option<&SignPsbtOptions>,
    config: &ReviewConfig,
) -> Result<TxReview, ValidationError> {
    let implied = decoded.implied_fee()?;
    if implied != decoded.fee_sats {
        return Err(ValidationError::FeeMismatch { reported: decoded.fee_sats, implied });
    }

    let to_sign_inputs = if kind.is_generic_signing() {
        signers::resolve_to_sign_inputs(decoded, account, options)?
    } else {
        signers::account_inputs(decoded, account)
    };

    let review = TxReview {
        kind,
        balance: balance_summary(decoded, account),
        can_changed: can_changed(decoded, account),
        fee_rate_warning: fee_rate_warning(decoded, config),
        risk_flags: decoded.risk_flags(),
        is_scam_flagged: decoded.is_scammer,
        to_sign_inputs,
        decoded: decoded.clone(),
    };
    debug!(target: "review", ?kind, %review, "analyzed transaction");
    Ok(review)
}

/// Computes the per-account aggregates.
pub fn balance_summary(decoded: &DecodedPsbt, account: &AccountContext) -> BalanceSummary {
    let sending = decoded
        .inputs
        .iter()
        .filter(|input| account.owns(input.address.as_deref()))
        .fold(0u64, |acc, input| acc.saturating_add(input.value_sats));
    let receiving = decoded
        .outputs
        .iter()
        .filter(|output| account.owns(output.address.as_deref()))
        .fold(0u64, |acc, output| acc.saturating_add(output.value_sats));
    let spend = to_signed(sending).saturating_sub(to_signed(receiving));
    BalanceSummary { spend, sending, receiving, balance_change: spend.saturating_neg() }
}

/// Returns false if any account input carries no sighash or one committing to everything.
///
/// `0` is treated like an absent sighash. Other values, including `ALL|ANYONECANPAY`, count as
/// restricting modification.
pub fn can_changed(decoded: &DecodedPsbt, account: &AccountContext) -> bool {
    !decoded.inputs.iter().any(|input| {
        account.owns(input.address.as_deref())
            && input.sighash_type.is_none_or(|ty| ty == 0 || ty == SIGHASH_ALL)
    })
}

/// Compares the actual fee rate against the recommendation.
pub fn fee_rate_warning(decoded: &DecodedPsbt, config: &ReviewConfig) -> Option<FeeRateWarning> {
    let recommended = decoded.recommended_fee_rate;
    if recommended <= 0.0 {
        return None;
    }
    if decoded.fee_rate < recommended * config.fee_rate_low_ratio {
        Some(FeeRateWarning::TooLow)
    } else if decoded.fee_rate > recommended * config.fee_rate_high_ratio {
        Some(FeeRateWarning::TooHigh)
    } else {
        None
    }
}

fn to_signed(sats: u64) -> i64 {
    i64::try_from(sats).unwrap_or(i64::MAX)
}

/// Decodes and analyzes in one step.
#[derive(Clone, Debug)]
pub struct TxAnalyzer {
    decoder: PsbtDecoder,
    config: ReviewConfig,
}

impl TxAnalyzer {
    pub fn new(config: ReviewConfig) -> Self {
        Self { decoder: PsbtDecoder::new(config.network), config }
    }

    pub fn decoder(&self) -> &PsbtDecoder {
        &self.decoder
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    /// Analyzes a hex encoded PSBT.
    pub fn analyze_hex(
        &self,
        raw: &str,
        account: &AccountContext,
        kind: TxType,
        options: Option<&SignPsbtOptions>,
    ) -> Result<TxReview, ValidationError> {
        let decoded = self.decoder.decode_hex(raw)?;
        self.analyze(&decoded, account, kind, options)
    }

    pub fn analyze(
        &self,
        decoded: &DecodedPsbt,
        account: &AccountContext,
        kind: TxType,
        options: Option<&SignPsbtOptions>,
    ) -> Result<TxReview, ValidationError> {
        analyze(decoded, account, kind, options, &self.config)
    }
}

impl Default for TxAnalyzer {
    fn default() -> Self {
        Self::new(ReviewConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decode::tests::{ACCOUNT, ACCOUNT_KEY, OTHER, build_psbt, build_psbt_hex},
        types::{Risk, RiskAssessment, RiskLevel, ToSignInputOption},
    };
    use bitcoin::{PublicKey, psbt::PsbtSighashType};
    use proptest::prelude::*;
    use similar_asserts::assert_eq;
    use std::str::FromStr;

    const LEGACY: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";
    const SCRIPT_HASH: &str = "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy";

    fn account() -> AccountContext {
        AccountContext::new(ACCOUNT, PublicKey::from_str(ACCOUNT_KEY).unwrap())
    }

    fn decode(inputs: &[(&str, u64)], outputs: &[(&str, u64)]) -> DecodedPsbt {
        PsbtDecoder::default().decode_psbt(&build_psbt(inputs, outputs)).unwrap()
    }

    #[test]
    fn computes_spend_sending_receiving() {
        let raw = build_psbt_hex(
            &[(ACCOUNT, 100_000), (ACCOUNT, 50_000)],
            &[(ACCOUNT, 120_000), (OTHER, 25_000)],
        );
        let review =
            TxAnalyzer::default().analyze_hex(&raw, &account(), TxType::SendBitcoin, None).unwrap();

        assert_eq!(review.decoded.fee_sats, 5_000);
        assert_eq!(
            review.balance,
            BalanceSummary { spend: 30_000, sending: 150_000, receiving: 120_000, balance_change: -30_000 }
        );
        assert_eq!(review.to_sign_inputs.iter().map(|i| i.index).collect::<Vec<_>>(), vec![0, 1]);
        assert!(review.is_valid());
        assert!(!review.requires_risk_acknowledgement());
        assert!(!review.is_scam_flagged);
    }

    #[test]
    fn incoming_funds_yield_negative_spend() {
        let decoded = decode(&[(OTHER, 60_000)], &[(ACCOUNT, 50_000), (OTHER, 9_000)]);
        let balance = balance_summary(&decoded, &account());
        assert_eq!(balance.spend, -50_000);
        assert_eq!(balance.balance_change, 50_000);
        assert_eq!(balance.sending, 0);
    }

    #[test]
    fn foreign_inputs_are_not_signed_for_transfers() {
        let decoded = decode(&[(LEGACY, 10_000), (ACCOUNT, 10_000)], &[(SCRIPT_HASH, 19_000)]);
        let review =
            analyze(&decoded, &account(), TxType::SendRunes, None, &ReviewConfig::default()).unwrap();
        assert_eq!(review.to_sign_inputs.len(), 1);
        assert_eq!(review.to_sign_inputs[0].index, 1);
    }

    #[test]
    fn generic_signing_uses_options() {
        let decoded = decode(&[(OTHER, 10_000), (ACCOUNT, 10_000)], &[(OTHER, 19_000)]);
        let options = SignPsbtOptions {
            auto_finalized: false,
            to_sign_inputs: Some(vec![ToSignInputOption { index: 0, ..Default::default() }]),
        };
        let review =
            analyze(&decoded, &account(), TxType::SignTx, Some(&options), &ReviewConfig::default())
                .unwrap();
        assert_eq!(review.to_sign_inputs.len(), 1);
        assert_eq!(review.to_sign_inputs[0].index, 0);

        let options = SignPsbtOptions {
            auto_finalized: true,
            to_sign_inputs: Some(vec![ToSignInputOption { index: 2, ..Default::default() }]),
        };
        let err =
            analyze(&decoded, &account(), TxType::SignTx, Some(&options), &ReviewConfig::default())
                .unwrap_err();
        assert_eq!(err, ValidationError::InputOutOfRange { index: 2, count: 2 });
    }

    #[test]
    fn nothing_to_sign_is_invalid() {
        let decoded = decode(&[(OTHER, 10_000)], &[(OTHER, 9_000)]);
        let review =
            analyze(&decoded, &account(), TxType::SendBitcoin, None, &ReviewConfig::default())
                .unwrap();
        assert!(!review.is_valid());
        assert_eq!(review.ensure_valid(), Err(ValidationError::NothingToSign));
    }

    #[test]
    fn rejects_inconsistent_fee() {
        let mut decoded = decode(&[(ACCOUNT, 10_000)], &[(OTHER, 9_000)]);
        decoded.fee_sats = 500;
        let err = analyze(&decoded, &account(), TxType::SendBitcoin, None, &ReviewConfig::default())
            .unwrap_err();
        assert_eq!(err, ValidationError::FeeMismatch { reported: 500, implied: 1_000 });
    }

    #[test]
    fn default_sighash_can_be_changed() {
        let mut psbt = build_psbt(&[(ACCOUNT, 10_000), (OTHER, 10_000)], &[(OTHER, 19_000)]);
        let decoder = PsbtDecoder::default();
        assert!(!can_changed(&decoder.decode_psbt(&psbt).unwrap(), &account()));

        psbt.inputs[0].sighash_type = Some(PsbtSighashType::from_u32(SIGHASH_ALL));
        assert!(!can_changed(&decoder.decode_psbt(&psbt).unwrap(), &account()));

        psbt.inputs[0].sighash_type = Some(PsbtSighashType::from_u32(0));
        assert!(!can_changed(&decoder.decode_psbt(&psbt).unwrap(), &account()));

        // SINGLE|ANYONECANPAY
        psbt.inputs[0].sighash_type = Some(PsbtSighashType::from_u32(0x83));
        let decoded = decoder.decode_psbt(&psbt).unwrap();
        assert!(can_changed(&decoded, &account()));
        let review =
            analyze(&decoded, &account(), TxType::SignTx, None, &ReviewConfig::default()).unwrap();
        assert!(!review.show_fee_details());
    }

    #[test]
    fn warns_on_fee_rate_deviation() {
        let config = ReviewConfig::default();
        let mut decoded = decode(&[(ACCOUNT, 10_000)], &[(OTHER, 9_000)]);
        assert_eq!(fee_rate_warning(&decoded, &config), None);

        decoded.fee_rate = 10.0;
        decoded.recommended_fee_rate = 30.0;
        assert_eq!(fee_rate_warning(&decoded, &config), Some(FeeRateWarning::TooLow));

        decoded.recommended_fee_rate = 15.0;
        assert_eq!(fee_rate_warning(&decoded, &config), None);

        decoded.recommended_fee_rate = 1.5;
        assert_eq!(fee_rate_warning(&decoded, &config), Some(FeeRateWarning::TooHigh));
        assert_eq!(
            FeeRateWarning::TooHigh.message(1.5),
            "The fee rate is much higher than recommended fee rate (1.5 sat/vB)"
        );
    }

    #[test]
    fn collects_risks_and_scam_flag() {
        let decoded = decode(&[(ACCOUNT, 10_000)], &[(OTHER, 9_000)]).with_assessment(RiskAssessment {
            recommended_fee_rate: 2.0,
            risks: vec![Risk {
                kind: RiskKind::InscriptionBurning,
                level: RiskLevel::Danger,
                title: "Burning inscription".to_string(),
                description: "An inscription will be burned".to_string(),
            }],
            is_scammer: true,
        });
        let review =
            analyze(&decoded, &account(), TxType::SendBitcoin, None, &ReviewConfig::default())
                .unwrap();
        assert!(review.requires_risk_acknowledgement());
        assert!(review.is_scam_flagged);
        assert_eq!(review.risk_flags, BTreeSet::from([RiskKind::InscriptionBurning]));
    }

    proptest! {
        #[test]
        fn analysis_is_pure(
            inputs in prop::collection::vec((any::<bool>(), 1_000u64..1_000_000), 1..6),
            outputs in prop::collection::vec((any::<bool>(), 1u64..200), 0..5),
        ) {
            let pick = |mine: bool| if mine { ACCOUNT } else { OTHER };
            let inputs = inputs.iter().map(|(mine, sats)| (pick(*mine), *sats)).collect::<Vec<_>>();
            let outputs = outputs.iter().map(|(mine, sats)| (pick(*mine), *sats)).collect::<Vec<_>>();
            let raw = build_psbt_hex(&inputs, &outputs);

            let analyzer = TxAnalyzer::default();
            let first = analyzer.analyze_hex(&raw, &account(), TxType::SignTx, None).unwrap();
            let second = analyzer.analyze_hex(&raw, &account(), TxType::SignTx, None).unwrap();
            prop_assert_eq!(
                serde_json::to_vec(&first).unwrap(),
                serde_json::to_vec(&second).unwrap()
            );

            let total_in: u64 = inputs.iter().map(|(_, sats)| sats).sum();
            let total_out: u64 = outputs.iter().map(|(_, sats)| sats).sum();
            prop_assert_eq!(first.decoded.fee_sats, total_in - total_out);
            prop_assert_eq!(
                first.balance.spend,
                first.balance.sending as i64 - first.balance.receiving as i64
            );
        }
    }
}
