//! Finality, reorg and quorum behaviour across a settlement's life after
//! execution.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use fairsettle_finality::{FinalityController, required_votes};
use fairsettle_oracle::{FeedSelector, MockPriceSource};
use fairsettle_settlement::SettlementEngine;
use fairsettle_types::*;
use rust_decimal::Decimal;

const T0: i64 = 1_700_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn admin() -> AccountId {
    AccountId::from_low_u64(0xAD)
}

fn time_at(height: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(T0 + 12 * i64::try_from(height).unwrap(), 0).unwrap()
}

fn block_hash(height: u64, fork: u8) -> [u8; 32] {
    let mut h = [fork; 32];
    h[..8].copy_from_slice(&height.to_le_bytes());
    h
}

/// Helper: a controller with oracle sources configured and a block clock.
struct Chain {
    ctl: FinalityController<MockPriceSource>,
    fork: u8,
}

impl Chain {
    fn new() -> Self {
        init_tracing();
        let engine = SettlementEngine::new(
            ProtocolConfig::default(),
            admin(),
            MockPriceSource::new(),
            time_at(0),
        )
        .unwrap();
        let mut chain = Self {
            ctl: FinalityController::new(engine),
            fork: 0,
        };
        for i in 1..=3u8 {
            chain
                .ctl
                .engine_mut()
                .configure_source(
                    admin(),
                    SourceClass::Push,
                    AccountId::from_low_u64(200 + u64::from(i)),
                    FeedSelector([i; 32]),
                )
                .unwrap();
        }
        chain.quote();
        chain
    }

    fn height(&self) -> u64 {
        self.ctl.engine().height().0
    }

    fn quote(&mut self) {
        let at = self.ctl.engine().chain().timestamp;
        for i in 1..=3 {
            self.ctl
                .engine_mut()
                .feed_mut()
                .set_price(AccountId::from_low_u64(200 + i), Decimal::from(2000), at);
        }
    }

    fn advance(&mut self, blocks: u64) {
        let next = self.height() + blocks;
        self.ctl
            .observe_block(BlockHeight(next), time_at(next), block_hash(next, self.fork))
            .unwrap();
        self.quote();
    }

    /// Create, fund, initiate, confirm and execute a one-transfer settlement.
    fn settle(&mut self) -> SettlementId {
        let from = AccountId::from_low_u64(1);
        let to = AccountId::from_low_u64(2);
        let engine = self.ctl.engine_mut();
        let id = engine
            .create_settlement(from, vec![TransferRequest::new(from, to, Decimal::ONE)], 1_000)
            .unwrap();
        engine.deposit(from, id, Decimal::ONE).unwrap();
        engine.initiate_settlement(id).unwrap();
        self.advance(3);
        assert!(self.ctl.execute_settlement(id, 10).unwrap().is_complete());
        id
    }
}

#[test]
fn phases_never_regress() {
    let mut chain = Chain::new();
    let id = chain.settle();

    let mut last = chain.ctl.get_settlement_finality(id).unwrap();
    assert_eq!(last.phase, FinalityPhase::Tentative);
    for _ in 0..80 {
        chain.advance(1);
        let now = chain.ctl.get_settlement_finality(id).unwrap();
        assert!(now.phase >= last.phase);
        assert!(now.confidence >= last.confidence);
        assert!(now.confirmations > last.confirmations);
        last = now;
    }
    assert_eq!(last.phase, FinalityPhase::Final);
    assert_eq!(last.confidence, constants::FINAL_CONFIDENCE);
}

#[test]
fn reorg_safety_immediately_after_execution() {
    let mut chain = Chain::new();
    let id = chain.settle();
    let max = chain.ctl.engine().config().finality.max_reorg_depth;

    assert!(chain.ctl.is_reorg_safe_at_depth(id, 0).unwrap());
    assert!(!chain.ctl.is_reorg_safe_at_depth(id, max).unwrap());

    chain.advance(5);
    assert!(chain.ctl.is_reorg_safe_at_depth(id, 0).unwrap());
    assert!(chain.ctl.is_reorg_safe_at_depth(id, 4).unwrap());
    assert!(!chain.ctl.is_reorg_safe_at_depth(id, 5).unwrap());
}

#[test]
fn reorg_is_detected_and_recovered() {
    let mut chain = Chain::new();
    let id = chain.settle();
    let executed_at = chain.height();
    let recorded = chain.ctl.get_settlement_finality(id).unwrap().fingerprint;
    chain.advance(20);
    assert_eq!(
        chain.ctl.get_settlement_finality(id).unwrap().phase,
        FinalityPhase::SemiFinal
    );

    // A competing fork replaces the execution block.
    let observed = BlockFingerprint::of(
        chain.ctl.engine().config().chain_id,
        BlockHeight(executed_at),
        &block_hash(executed_at, 0xFF),
    );
    let err = chain.ctl.check_for_reorg(id, observed).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Reorg);
    assert!(matches!(
        err,
        FairsettleError::ReorgDetected {
            estimated_depth: 21,
            ..
        }
    ));

    let frozen = chain.ctl.get_settlement_finality(id).unwrap();
    assert!(frozen.reorg_detected);
    assert!(!chain.ctl.is_reorg_safe_at_depth(id, 1).unwrap());
    chain.advance(100);
    assert_eq!(chain.ctl.get_settlement_finality(id).unwrap().phase, frozen.phase);

    // Settlement state is not rolled back.
    let settlement = chain.ctl.engine().settlement(id).unwrap();
    assert_eq!(settlement.state, SettlementState::Finalized);

    chain.fork = 0xFF;
    chain.advance(1);
    chain.ctl.recover_from_reorg(admin(), id).unwrap();
    let fresh = chain.ctl.get_settlement_finality(id).unwrap();
    assert_eq!(fresh.phase, FinalityPhase::Tentative);
    assert!(!fresh.reorg_detected);
    assert_ne!(fresh.fingerprint, recorded);
    assert_eq!(fresh.executed_at, BlockHeight(chain.height()));
    chain.ctl.check_for_reorg(id, fresh.fingerprint).unwrap();

    let kinds: Vec<&EventPayload> = chain
        .ctl
        .engine()
        .events()
        .events()
        .iter()
        .map(|e| &e.payload)
        .collect();
    assert!(kinds.iter().any(|p| matches!(p, EventPayload::ReorgDetected { .. })));
    assert!(kinds.iter().any(|p| matches!(p, EventPayload::ReorgRecovered { .. })));
    chain.ctl.engine().verify_conservation().unwrap();
}

#[test]
fn three_validators_quorum() {
    let mut chain = Chain::new();
    let id = chain.settle();
    let keys: Vec<SigningKey> = (1..=3u8).map(|i| SigningKey::from_bytes(&[i; 32])).collect();
    for (i, key) in keys.iter().enumerate() {
        let validator = AccountId::from_low_u64(0x700 + i as u64);
        chain
            .ctl
            .register_validator(admin(), validator, key.verifying_key())
            .unwrap();
    }

    let status = chain.ctl.get_quorum_status(id);
    assert_eq!(status.total_validators, 3);
    assert_eq!(status.required_votes, 3);
    assert_eq!(required_votes(3), 3);
    assert_eq!(status.votes, 0);
    assert!(!status.reached());

    let payload = chain.ctl.vote_payload(id).unwrap();
    for (i, key) in keys.iter().enumerate() {
        let validator = AccountId::from_low_u64(0x700 + i as u64);
        let votes = chain
            .ctl
            .submit_vote(validator, id, &key.sign(&payload))
            .unwrap();
        assert_eq!(votes, i + 1);
    }
    let status = chain.ctl.get_quorum_status(id);
    assert_eq!(status.votes, 3);
    assert!(status.reached());
}

#[test]
fn bad_votes_are_rejected() {
    let mut chain = Chain::new();
    let id = chain.settle();
    let honest = SigningKey::from_bytes(&[1u8; 32]);
    let impostor = SigningKey::from_bytes(&[2u8; 32]);
    let validator = AccountId::from_low_u64(0x701);
    chain
        .ctl
        .register_validator(admin(), validator, honest.verifying_key())
        .unwrap();
    let payload = chain.ctl.vote_payload(id).unwrap();

    let err = chain
        .ctl
        .submit_vote(validator, id, &impostor.sign(&payload))
        .unwrap_err();
    assert!(matches!(err, FairsettleError::InvalidVoteSignature(_)));
    assert_eq!(err.class(), ErrorClass::Authorization);

    // A signature over any other payload does not count.
    let mut other = payload.clone();
    let last = other.len() - 1;
    other[last] ^= 1;
    assert!(chain
        .ctl
        .submit_vote(validator, id, &honest.sign(&other))
        .is_err());

    let outsider = AccountId::from_low_u64(0x799);
    assert!(matches!(
        chain.ctl.submit_vote(outsider, id, &honest.sign(&payload)),
        Err(FairsettleError::NotValidator(_))
    ));
    assert_eq!(chain.ctl.get_quorum_status(id).votes, 0);

    assert!(matches!(
        chain.ctl.submit_vote(validator, SettlementId(999), &honest.sign(&payload)),
        Err(FairsettleError::NoFinalityRecord(_))
    ));
}

#[test]
fn recovery_discards_votes_on_the_orphaned_block() {
    let mut chain = Chain::new();
    let id = chain.settle();
    let keys: Vec<SigningKey> = (5..=7u8).map(|i| SigningKey::from_bytes(&[i; 32])).collect();
    let validators: Vec<AccountId> = (5..=7u64).map(|i| AccountId::from_low_u64(0x700 + i)).collect();
    for (validator, key) in validators.iter().zip(&keys) {
        chain
            .ctl
            .register_validator(admin(), *validator, key.verifying_key())
            .unwrap();
    }
    let old_payload = chain.ctl.vote_payload(id).unwrap();
    for (validator, key) in validators.iter().zip(&keys) {
        chain
            .ctl
            .submit_vote(*validator, id, &key.sign(&old_payload))
            .unwrap();
    }
    assert!(chain.ctl.get_quorum_status(id).reached());
    let (validator, key) = (validators[0], &keys[0]);

    chain.advance(2);
    chain.ctl.recover_from_reorg(admin(), id).unwrap();
    assert_eq!(chain.ctl.get_quorum_status(id).votes, 0);
    assert!(chain
        .ctl
        .submit_vote(validator, id, &key.sign(&old_payload))
        .is_err());

    let new_payload = chain.ctl.vote_payload(id).unwrap();
    assert_eq!(
        chain.ctl.submit_vote(validator, id, &key.sign(&new_payload)).unwrap(),
        1
    );
}
