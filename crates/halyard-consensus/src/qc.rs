use halyard_core::{
    Hash, HashVerifier, HighQc, QuorumCertificate, TimeoutCertificate, TimestampedSignatures,
};

use crate::error::ConsensusError;
use crate::validator_set::ValidatorSet;

/// Check every signature in `signatures` against the digest its timestamp
/// yields and return the total weight of the signers
fn verified_weight(
    signatures: &TimestampedSignatures,
    validators: &ValidatorSet,
    verifier: &dyn HashVerifier,
    digest_for: impl Fn(u64) -> Result<Hash, ConsensusError>,
) -> Result<u64, ConsensusError> {
    let mut weight = 0u64;
    for (key, signed) in signatures.iter() {
        if !validators.contains(key) {
            return Err(ConsensusError::UnknownAuthor(*key));
        }
        let digest = digest_for(signed.timestamp)?;
        if !verifier.verify_hash(key, &digest, &signed.signature) {
            return Err(ConsensusError::InvalidSignature(*key));
        }
        weight += validators.weight_of(key);
    }
    Ok(weight)
}

/// Verify a quorum certificate against the validator set of its epoch.
/// An epoch's genesis QC certifies itself and carries no signatures.
pub fn verify_qc(
    qc: &QuorumCertificate,
    validators: &ValidatorSet,
    verifier: &dyn HashVerifier,
) -> Result<(), ConsensusError> {
    if qc.is_genesis() {
        return Ok(());
    }

    if qc.parent().view >= qc.view() {
        return Err(ConsensusError::InvalidQc(format!(
            "parent view {} not below proposed view {}",
            qc.parent().view,
            qc.view()
        )));
    }
    if let Some(committed) = qc.committed() {
        if committed.view >= qc.parent().view {
            return Err(ConsensusError::InvalidQc(format!(
                "committed view {} not below parent view {}",
                committed.view,
                qc.parent().view
            )));
        }
    }

    let weight = verified_weight(&qc.signatures, validators, verifier, |timestamp| {
        Ok(qc.vote_data.signing_hash(timestamp)?)
    })?;

    let need = validators.quorum_threshold();
    if weight < need {
        return Err(ConsensusError::InsufficientWeight { have: weight, need });
    }
    Ok(())
}

pub fn verify_tc(
    tc: &TimeoutCertificate,
    validators: &ValidatorSet,
    verifier: &dyn HashVerifier,
) -> Result<(), ConsensusError> {
    let digest = tc.signing_hash()?;
    let weight = verified_weight(&tc.signatures, validators, verifier, |_| Ok(digest))
        .map_err(|e| ConsensusError::InvalidTc(e.to_string()))?;

    let need = validators.quorum_threshold();
    if weight < need {
        return Err(ConsensusError::InsufficientWeight { have: weight, need });
    }
    Ok(())
}

/// Verify each certificate a `HighQc` carries
pub fn verify_high_qc(
    high_qc: &HighQc,
    validators: &ValidatorSet,
    verifier: &dyn HashVerifier,
) -> Result<(), ConsensusError> {
    let committed_qc = high_qc.highest_committed_qc();
    if committed_qc.committed().is_none() {
        return Err(ConsensusError::InvalidQc(
            "highest committed QC commits nothing".to_string(),
        ));
    }

    verify_qc(high_qc.highest_qc(), validators, verifier)?;
    if committed_qc != high_qc.highest_qc() {
        verify_qc(committed_qc, validators, verifier)?;
    }
    if let Some(tc) = high_qc.highest_tc() {
        verify_tc(tc, validators, verifier)?;
    }
    Ok(())
}
