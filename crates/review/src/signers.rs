//! Resolution of the inputs the local key has to sign.

use crate::{
    error::ValidationError,
    types::{AccountContext, DecodedPsbt, SignPsbtOptions, ToSignInput, ToSignInputOption},
};
use std::collections::BTreeSet;

/// Returns every input that spends an output of `account`, signed with the account key.
pub fn account_inputs(decoded: &DecodedPsbt, account: &AccountContext) -> Vec<ToSignInput> {
    decoded
        .inputs
        .iter()
        .enumerate()
        .filter(|(_, input)| account.owns(input.address.as_deref()))
        .map(|(index, _)| ToSignInput {
            index,
            public_key: account.public_key,
            sighash_types: None,
            disable_tweak_signer: None,
        })
        .collect()
}

/// Resolves the to-sign set of a generic signing request.
///
/// Without explicit `toSignInputs` this falls back to [`account_inputs`].
pub fn resolve_to_sign_inputs(
    decoded: &DecodedPsbt,
    account: &AccountContext,
    options: Option<&SignPsbtOptions>,
) -> Result<Vec<ToSignInput>, ValidationError> {
    match options.and_then(|options| options.to_sign_inputs.as_deref()) {
        Some(entries) => validate_to_sign_inputs(entries, decoded.inputs.len(), account),
        None => Ok(account_inputs(decoded, account)),
    }
}

/// Validates page supplied entries against the decoded input count and the account.
pub fn validate_to_sign_inputs(
    entries: &[ToSignInputOption],
    input_count: usize,
    account: &AccountContext,
) -> Result<Vec<ToSignInput>, ValidationError> {
    let mut seen = BTreeSet::new();
    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        let index = entry.index;
        check_index(index, input_count, &mut seen)?;
        if let Some(address) = &entry.address
            && !account.owns(Some(address))
        {
            return Err(ValidationError::AddressMismatch { index, address: address.clone() });
        }
        if let Some(public_key) = &entry.public_key
            && !public_key.eq_ignore_ascii_case(&account.public_key.to_string())
        {
            return Err(ValidationError::PublicKeyMismatch {
                index,
                public_key: public_key.clone(),
            });
        }
        resolved.push(ToSignInput {
            index,
            public_key: account.public_key,
            sighash_types: entry.sighash_types.clone(),
            disable_tweak_signer: entry.disable_tweak_signer,
        });
    }
    Ok(resolved)
}

/// Checks a to-sign set resolved elsewhere, e.g. by the signing service.
///
/// Applies the same index rules as [`validate_to_sign_inputs`].
pub fn check_to_sign_inputs(inputs: &[ToSignInput], input_count: usize) -> Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    inputs.iter().try_for_each(|input| check_index(input.index, input_count, &mut seen))
}

fn check_index(
    index: usize,
    input_count: usize,
    seen: &mut BTreeSet<usize>,
) -> Result<(), ValidationError> {
    if index >= input_count {
        return Err(ValidationError::InputOutOfRange { index, count: input_count });
    }
    if !seen.insert(index) {
        return Err(ValidationError::DuplicateInput(index));
    }
    Ok(())
}
