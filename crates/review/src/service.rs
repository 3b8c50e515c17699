//! Preparation of a signing request against the background keyring service.

use crate::{
    analyze::{TxAnalyzer, TxReview},
    error::ReviewError,
    signers,
    types::{AccountContext, DecodedPsbt, KeyringKind, SignPsbtOptions, ToSignInput},
};
use async_trait::async_trait;
use opwallet_rpc::TxType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The background service that holds the keys.
///
/// The review engine decides what must be signed; it never signs itself.
#[async_trait]
pub trait SigningService: Send + Sync {
    /// Decodes a PSBT and attaches fee recommendations and risk verdicts.
    async fn decode_psbt(
        &self,
        psbt_hex: &str,
        origin: Option<&str>,
    ) -> Result<DecodedPsbt, ReviewError>;

    /// Resolves page supplied options into the inputs to sign.
    ///
    /// Out of range indices fail with [`crate::ValidationError::InputOutOfRange`].
    async fn format_options_to_sign_inputs(
        &self,
        psbt_hex: &str,
        options: Option<&SignPsbtOptions>,
    ) -> Result<Vec<ToSignInput>, ReviewError>;

    /// Signs `to_sign_inputs` and returns the updated PSBT as hex.
    async fn sign_psbt_with_hex(
        &self,
        psbt_hex: &str,
        to_sign_inputs: &[ToSignInput],
        finalize: bool,
    ) -> Result<String, ReviewError>;
}

#[async_trait]
impl<S: SigningService + ?Sized> SigningService for Arc<S> {
    async fn decode_psbt(
        &self,
        psbt_hex: &str,
        origin: Option<&str>,
    ) -> Result<DecodedPsbt, ReviewError> {
        (**self).decode_psbt(psbt_hex, origin).await
    }

    async fn format_options_to_sign_inputs(
        &self,
        psbt_hex: &str,
        options: Option<&SignPsbtOptions>,
    ) -> Result<Vec<ToSignInput>, ReviewError> {
        (**self).format_options_to_sign_inputs(psbt_hex, options).await
    }

    async fn sign_psbt_with_hex(
        &self,
        psbt_hex: &str,
        to_sign_inputs: &[ToSignInput],
        finalize: bool,
    ) -> Result<String, ReviewError> {
        (**self).sign_psbt_with_hex(psbt_hex, to_sign_inputs, finalize).await
    }
}

/// A signing request as received from the page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    #[serde(rename = "type")]
    pub kind: TxType,
    pub psbt_hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SignPsbtOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl ReviewRequest {
    pub fn new(kind: TxType, psbt_hex: impl Into<String>) -> Self {
        Self { kind, psbt_hex: psbt_hex.into(), options: None, origin: None }
    }

    pub fn with_options(mut self, options: SignPsbtOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// A transaction ready to be shown on the approval screen.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedReview {
    /// The PSBT to return on confirmation, possibly pre-signed for external keyrings
    pub psbt_hex: String,
    pub review: TxReview,
    pub keyring: KeyringKind,
}

/// Prepares signing requests of one account.
#[derive(Clone, Debug)]
pub struct Reviewer<S> {
    service: S,
    analyzer: TxAnalyzer,
    account: AccountContext,
}

impl<S: SigningService> Reviewer<S> {
    pub fn new(service: S, analyzer: TxAnalyzer, account: AccountContext) -> Self {
        Self { service, analyzer, account }
    }

    pub fn account(&self) -> &AccountContext {
        &self.account
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Runs the loading phase of an approval: pre-signing, decoding and analysis.
    pub async fn prepare(&self, request: &ReviewRequest) -> Result<PreparedReview, ReviewError> {
        let ReviewRequest { kind, psbt_hex, options, origin } = request;
        let generic = kind.is_generic_signing();
        let mut psbt_hex = psbt_hex.clone();

        let to_sign = if generic {
            Some(self.service.format_options_to_sign_inputs(&psbt_hex, options.as_ref()).await?)
        } else {
            None
        };

        if generic && self.account.keyring.is_external() {
            // external devices need the local partial signatures before they can sign
            let inputs = to_sign.as_deref().unwrap_or_default();
            match self.service.sign_psbt_with_hex(&psbt_hex, inputs, false).await {
                Ok(signed) => psbt_hex = signed,
                Err(err) => warn!(target: "review", %err, "failed to pre-sign psbt for external keyring"),
            }
        }

        let decoded = self.service.decode_psbt(&psbt_hex, origin.as_deref()).await?;
        let mut review = self.analyzer.analyze(&decoded, &self.account, *kind, options.as_ref())?;

        if let Some(to_sign) = to_sign {
            signers::check_to_sign_inputs(&to_sign, review.decoded.inputs.len())?;
            review.to_sign_inputs = to_sign;
        }

        debug!(target: "review", ?kind, origin = ?origin, %review, "prepared review");
        Ok(PreparedReview { psbt_hex, review, keyring: self.account.keyring })
    }
}
