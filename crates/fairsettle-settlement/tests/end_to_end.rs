//! End-to-end settlement lifecycle tests.
//!
//! These drive the engine the way a keeper and its clients would: observe
//! blocks, push oracle quotes, and walk settlements through create →
//! deposit → initiate → execute, plus the dispute, refund, and
//! commit-reveal paths.

use chrono::{DateTime, Duration, Utc};
use fairsettle_ingress::{SettlementIntent, commitment_hash};
use fairsettle_oracle::{FeedSelector, MockPriceSource};
use fairsettle_settlement::SettlementEngine;
use fairsettle_types::*;
use rust_decimal::Decimal;

const GENESIS: i64 = 1_700_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn admin() -> AccountId {
    AccountId::from_low_u64(0xAD)
}

fn alice() -> AccountId {
    AccountId::from_low_u64(0xA)
}

fn bob() -> AccountId {
    AccountId::from_low_u64(0xB)
}

fn carol() -> AccountId {
    AccountId::from_low_u64(0xC)
}

/// Helper: engine plus three push sources and a block clock.
struct Harness {
    engine: SettlementEngine<MockPriceSource>,
}

impl Harness {
    fn new() -> Self {
        init_tracing();
        let genesis = DateTime::from_timestamp(GENESIS, 0).unwrap();
        let mut engine = SettlementEngine::new(
            ProtocolConfig::default(),
            admin(),
            MockPriceSource::new(),
            genesis,
        )
        .unwrap();
        for i in 1..=3 {
            engine
                .configure_source(
                    admin(),
                    SourceClass::Push,
                    AccountId::from_low_u64(100 + i),
                    FeedSelector([i as u8; 32]),
                )
                .unwrap();
        }
        let mut h = Self { engine };
        h.set_price(Decimal::new(200_000, 2));
        h
    }

    fn now(&self) -> DateTime<Utc> {
        self.engine.chain().timestamp
    }

    /// Every source reports `price`, observed at the current block time.
    fn set_price(&mut self, price: Decimal) {
        let at = self.now();
        for i in 1..=3 {
            self.engine
                .feed_mut()
                .set_price(AccountId::from_low_u64(100 + i), price, at);
        }
    }

    /// Advance `blocks` blocks, 12 seconds apart, and refresh quotes.
    fn advance(&mut self, blocks: u64) {
        let next = self.engine.height().plus(blocks);
        let at = self.now() + Duration::seconds(12 * i64::try_from(blocks).unwrap());
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&next.0.to_le_bytes());
        self.engine.observe_block(next, at, hash).unwrap();
        let price = self
            .engine
            .latest_price()
            .filter(|p| p.is_reliable())
            .map_or(Decimal::new(200_000, 2), |p| p.median);
        self.set_price(price);
    }

    fn funded(&mut self, transfers: Vec<TransferRequest>) -> SettlementId {
        let total: Decimal = transfers.iter().map(|t| t.amount).sum();
        let id = self.engine.create_settlement(alice(), transfers, 100).unwrap();
        self.engine.deposit(alice(), id, total).unwrap();
        id
    }

    fn state(&self, id: SettlementId) -> SettlementState {
        self.engine.settlement(id).unwrap().state
    }

    /// Register source identity `100 + n` under `class`.
    fn add_source(&mut self, class: SourceClass, n: u64) {
        self.engine
            .configure_source(
                admin(),
                class,
                AccountId::from_low_u64(100 + n),
                FeedSelector([u8::try_from(n).unwrap(); 32]),
            )
            .unwrap();
    }

    /// Source `100 + n` reports `price`, observed `age_secs` ago.
    fn quote(&mut self, n: u64, price: Decimal, age_secs: i64) {
        let at = self.now() - Duration::seconds(age_secs);
        self.engine
            .feed_mut()
            .set_price(AccountId::from_low_u64(100 + n), price, at);
    }
}

fn one_unit() -> Vec<TransferRequest> {
    vec![TransferRequest::new(alice(), bob(), Decimal::ONE)]
}

#[test]
fn single_transfer_lifecycle() {
    let mut h = Harness::new();
    let id = h.funded(one_unit());

    let agg = h.engine.initiate_settlement(id).unwrap();
    assert_eq!(agg.median, Decimal::new(200_000, 2));
    assert_eq!(h.state(id), SettlementState::Initiated);
    assert_eq!(h.engine.queue_head(), None);

    h.advance(3);
    assert!(h.engine.can_execute(id));
    let progress = h.engine.execute_settlement(id, 10).unwrap();

    assert!(progress.is_complete());
    assert_eq!(h.engine.balance(&bob()), Decimal::ONE);
    let s = h.engine.settlement(id).unwrap();
    assert_eq!(s.state, SettlementState::Finalized);
    assert_eq!(s.executed_count, 1);
    assert_eq!(s.executed_count, s.transfer_count());
    assert_eq!(s.initiation_price, Some(Decimal::new(200_000, 2)));
    h.engine.verify_conservation().unwrap();
}

#[test]
fn execute_after_finalized_is_state_error_without_payment() {
    let mut h = Harness::new();
    let id = h.funded(one_unit());
    h.engine.initiate_settlement(id).unwrap();
    h.advance(3);
    h.engine.execute_settlement(id, 1).unwrap();

    for _ in 0..3 {
        let err = h.engine.execute_settlement(id, 1).unwrap_err();
        assert_eq!(err.class(), ErrorClass::State);
        assert!(matches!(
            err,
            FairsettleError::InvalidState {
                actual: SettlementState::Finalized,
                ..
            }
        ));
    }
    assert_eq!(h.engine.balance(&bob()), Decimal::ONE);
    h.engine.verify_conservation().unwrap();
}

#[test]
fn execution_needs_confirmations() {
    let mut h = Harness::new();
    let id = h.funded(one_unit());
    h.engine.initiate_settlement(id).unwrap();

    let err = h.engine.execute_settlement(id, 1).unwrap_err();
    assert!(matches!(
        err,
        FairsettleError::InsufficientConfirmations { have: 0, need: 3 }
    ));
    h.advance(2);
    assert!(!h.engine.can_execute(id));
    assert!(h.engine.execute_settlement(id, 1).is_err());
    assert_eq!(h.engine.balance(&bob()), Decimal::ZERO);

    h.advance(1);
    assert!(h.engine.execute_settlement(id, 1).is_ok());
}

#[test]
fn fifo_blocks_later_settlements() {
    let mut h = Harness::new();
    let first = h.funded(one_unit());
    let second = h.funded(one_unit());

    let err = h.engine.initiate_settlement(second).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Ordering);
    assert!(matches!(
        err,
        FairsettleError::NotQueueHead {
            head: Some(id),
            ..
        } if id == first
    ));
    assert_eq!(h.state(second), SettlementState::Pending);
    assert!(!h.engine.can_initiate(second));

    h.engine.initiate_settlement(first).unwrap();
    assert!(h.engine.can_initiate(second));
    h.engine.initiate_settlement(second).unwrap();
}

#[test]
fn multi_transfer_execution_resumes_in_batches() {
    let mut h = Harness::new();
    let transfers: Vec<TransferRequest> = (1..=5)
        .map(|i| TransferRequest::new(alice(), AccountId::from_low_u64(1000 + i), Decimal::from(i)))
        .collect();
    let id = h.funded(transfers);
    h.engine.initiate_settlement(id).unwrap();
    h.advance(3);

    let p1 = h.engine.execute_settlement(id, 2).unwrap();
    assert_eq!((p1.executed_now, p1.executed_total), (2, 2));
    assert_eq!(p1.state, SettlementState::Executing);
    assert_eq!(p1.amount_paid, Decimal::from(3));
    h.engine.verify_conservation().unwrap();

    let p2 = h.engine.execute_settlement(id, 2).unwrap();
    assert_eq!(p2.executed_total, 4);
    let p3 = h.engine.execute_settlement(id, 2).unwrap();
    assert_eq!(p3.executed_now, 1);
    assert!(p3.is_complete());

    let paid: Decimal = (1..=5)
        .map(|i| h.engine.balance(&AccountId::from_low_u64(1000 + i)))
        .sum();
    assert_eq!(paid, Decimal::from(15));
    assert_eq!(h.engine.settlement(id).unwrap().total_paid, Decimal::from(15));
    h.engine.verify_conservation().unwrap();
}

#[test]
fn timed_out_pending_settlement_refunds_every_depositor() {
    let mut h = Harness::new();
    let id = h
        .engine
        .create_settlement(alice(), vec![TransferRequest::new(alice(), bob(), Decimal::from(3))], 10)
        .unwrap();
    h.engine.deposit(alice(), id, Decimal::from(2)).unwrap();
    h.engine.deposit(carol(), id, Decimal::ONE).unwrap();

    let err = h.engine.refund_settlement(id).unwrap_err();
    assert!(matches!(err, FairsettleError::TimeoutNotReached { .. }));

    h.advance(11);
    assert!(matches!(
        h.engine.deposit(carol(), id, Decimal::ONE),
        Err(FairsettleError::SettlementTimedOut(_))
    ));
    assert!(matches!(
        h.engine.initiate_settlement(id),
        Err(FairsettleError::SettlementTimedOut(_))
    ));
    assert!(h.engine.can_refund(id));
    assert_eq!(h.engine.refund_settlement(id).unwrap(), Decimal::from(3));

    assert_eq!(h.state(id), SettlementState::Failed);
    assert_eq!(h.engine.balance(&alice()), Decimal::from(2));
    assert_eq!(h.engine.balance(&carol()), Decimal::ONE);
    assert_eq!(h.engine.queue_head(), None);
    assert!(h.engine.refund_settlement(id).is_err());
    h.engine.verify_conservation().unwrap();
}

#[test]
fn timed_out_settlement_behind_the_head_leaves_queue() {
    let mut h = Harness::new();
    let head = h.engine.create_settlement(alice(), one_unit(), 100).unwrap();
    let short = h.engine.create_settlement(alice(), one_unit(), 5).unwrap();
    h.advance(6);
    h.engine.refund_settlement(short).unwrap();
    assert_eq!(h.engine.queue_head(), Some(head));
    assert_eq!(h.engine.queue_len(), 1);
}

#[test]
fn upheld_dispute_refunds() {
    let mut h = Harness::new();
    let id = h.funded(one_unit());
    h.engine.initiate_settlement(id).unwrap();
    h.advance(1);

    let err = h.engine.dispute_settlement(carol(), id, "wrong price").unwrap_err();
    assert!(matches!(err, FairsettleError::NotParticipant { .. }));
    assert!(h.engine.dispute_settlement(bob(), id, "   ").is_err());

    h.engine.dispute_settlement(bob(), id, "wrong price").unwrap();
    assert_eq!(h.state(id), SettlementState::Disputed);
    assert!(matches!(
        h.engine.refund_settlement(id),
        Err(FairsettleError::DisputeUnresolved(_))
    ));
    assert!(matches!(
        h.engine.execute_settlement(id, 1),
        Err(FairsettleError::InvalidState { .. })
    ));

    assert!(matches!(
        h.engine.resolve_dispute(bob(), id, DisputeOutcome::Upheld),
        Err(FairsettleError::NotAdmin(_))
    ));
    h.engine
        .resolve_dispute(admin(), id, DisputeOutcome::Upheld)
        .unwrap();
    assert!(h.engine.can_refund(id));
    assert_eq!(h.engine.refund_settlement(id).unwrap(), Decimal::ONE);
    assert_eq!(h.state(id), SettlementState::Failed);
    assert_eq!(h.engine.balance(&alice()), Decimal::ONE);
    assert_eq!(h.engine.balance(&bob()), Decimal::ZERO);
    h.engine.verify_conservation().unwrap();
}

#[test]
fn dismissed_dispute_restarts_confirmations() {
    let mut h = Harness::new();
    let id = h.funded(one_unit());
    h.engine.initiate_settlement(id).unwrap();
    h.advance(2);
    h.engine.dispute_settlement(alice(), id, "hold").unwrap();
    h.advance(2);
    h.engine
        .resolve_dispute(admin(), id, DisputeOutcome::Dismissed)
        .unwrap();
    assert_eq!(h.state(id), SettlementState::Initiated);

    // Four blocks since first initiation, zero since reinstatement.
    assert!(matches!(
        h.engine.execute_settlement(id, 1),
        Err(FairsettleError::InsufficientConfirmations { have: 0, .. })
    ));
    h.advance(3);
    assert!(h.engine.execute_settlement(id, 1).unwrap().is_complete());
}

#[test]
fn dispute_window_closes() {
    let mut h = Harness::new();
    let id = h.funded(one_unit());
    h.engine.initiate_settlement(id).unwrap();
    h.advance(51);
    assert!(matches!(
        h.engine.dispute_settlement(bob(), id, "late"),
        Err(FairsettleError::DisputeWindowClosed(_))
    ));
}

#[test]
fn commitment_bound_settlement_waits_for_reveal() {
    let mut h = Harness::new();
    let intent = SettlementIntent {
        from: alice(),
        to: bob(),
        amount: Decimal::ONE,
        deadline: BlockHeight(500),
        salt: [7u8; 32],
        nonce: 0,
    };
    let hash = commitment_hash(h.engine.config().chain_id, &intent);
    h.engine.commit(alice(), hash).unwrap();

    assert!(matches!(
        h.engine.create_settlement_with_commitment(carol(), one_unit(), 100, hash),
        Err(FairsettleError::CommitterMismatch(_))
    ));
    let id = h
        .engine
        .create_settlement_with_commitment(alice(), one_unit(), 100, hash)
        .unwrap();
    h.engine.deposit(alice(), id, Decimal::ONE).unwrap();
    h.engine.initiate_settlement(id).unwrap();
    h.advance(3);

    assert!(matches!(
        h.engine.execute_settlement(id, 1),
        Err(FairsettleError::CommitmentNotRevealed(_))
    ));
    assert!(!h.engine.can_execute(id));

    h.engine.reveal(alice(), &intent).unwrap();
    assert_eq!(h.engine.gate().expected_nonce(alice()), 1);
    assert!(h.engine.execute_settlement(id, 1).unwrap().is_complete());
}

#[test]
fn bound_settlement_must_pay_the_revealed_intent() {
    let mut h = Harness::new();
    let chain_id = h.engine.config().chain_id;
    let intent = SettlementIntent {
        from: alice(),
        to: bob(),
        amount: Decimal::ONE,
        deadline: BlockHeight(500),
        salt: [3u8; 32],
        nonce: 0,
    };
    let hash = commitment_hash(chain_id, &intent);
    h.engine.commit(alice(), hash).unwrap();

    // The plaintext transfer list is not the committed one.
    let diverted = vec![TransferRequest::new(alice(), carol(), Decimal::from(100))];
    let id = h
        .engine
        .create_settlement_with_commitment(alice(), diverted.clone(), 100, hash)
        .unwrap();
    assert!(matches!(
        h.engine.create_settlement_with_commitment(alice(), diverted, 100, hash),
        Err(FairsettleError::CommitmentAlreadyBound(_))
    ));
    assert_eq!(h.engine.settlements().count(), 1);

    h.engine.deposit(alice(), id, Decimal::from(100)).unwrap();
    h.engine.initiate_settlement(id).unwrap();
    h.advance(3);
    h.engine.reveal(alice(), &intent).unwrap();

    let err = h.engine.execute_settlement(id, 1).unwrap_err();
    assert!(matches!(err, FairsettleError::CommitmentMismatch(_)));
    assert_eq!(err.class(), ErrorClass::Ordering);
    assert!(!h.engine.can_execute(id));
    assert_eq!(h.state(id), SettlementState::Initiated);
    assert_eq!(h.engine.balance(&carol()), Decimal::ZERO);
    assert_eq!(h.engine.balance(&bob()), Decimal::ZERO);
    h.engine.verify_conservation().unwrap();
}

#[test]
fn commitment_binding_rules() {
    let mut h = Harness::new();
    let chain_id = h.engine.config().chain_id;
    let intent = |nonce: u64| SettlementIntent {
        from: alice(),
        to: bob(),
        amount: Decimal::ONE,
        deadline: BlockHeight(500),
        salt: [9u8; 32],
        nonce,
    };

    // Revealed commitments are public and cannot guard a settlement.
    let revealed = commitment_hash(chain_id, &intent(0));
    h.engine.commit(alice(), revealed).unwrap();
    h.advance(1);
    h.engine.reveal(alice(), &intent(0)).unwrap();
    assert!(matches!(
        h.engine
            .create_settlement_with_commitment(alice(), one_unit(), 100, revealed),
        Err(FairsettleError::CommitmentNotFound(_))
    ));

    // A bound settlement carries exactly one transfer.
    let open = commitment_hash(chain_id, &intent(1));
    h.engine.commit(alice(), open).unwrap();
    let two = vec![
        TransferRequest::new(alice(), bob(), Decimal::ONE),
        TransferRequest::new(alice(), carol(), Decimal::ONE),
    ];
    assert!(matches!(
        h.engine.create_settlement_with_commitment(alice(), two, 100, open),
        Err(FairsettleError::InvalidArgument { .. })
    ));
    // Failed creations leave the commitment free.
    assert!(matches!(
        h.engine.create_settlement_with_commitment(alice(), one_unit(), 0, open),
        Err(FairsettleError::InvalidTimeout { .. })
    ));
    assert!(!h.engine.gate().is_bound(&open));
    h.engine
        .create_settlement_with_commitment(alice(), one_unit(), 100, open)
        .unwrap();
    assert!(h.engine.gate().is_bound(&open));
}

#[test]
fn deposit_overflow_is_rejected_without_mutation() {
    let mut h = Harness::new();
    let large = h
        .engine
        .create_settlement(alice(), vec![TransferRequest::new(alice(), bob(), Decimal::MAX)], 100)
        .unwrap();
    h.engine.deposit(alice(), large, Decimal::MAX).unwrap();
    let small = h.engine.create_settlement(alice(), one_unit(), 100).unwrap();

    let err = h.engine.deposit(carol(), small, Decimal::ONE).unwrap_err();
    assert!(matches!(err, FairsettleError::AmountOverflow));
    let s = h.engine.settlement(small).unwrap();
    assert_eq!(s.total_deposited, Decimal::ZERO);
    assert!(s.deposits.is_empty());
    let deposits = h
        .engine
        .events()
        .events()
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::Deposited { .. }))
        .count();
    assert_eq!(deposits, 1);
    h.engine.verify_conservation().unwrap();
}

#[test]
fn byzantine_minority_cannot_move_initiation_price() {
    // Honest median of 2000, 2001, 1999, 2002.
    let honest = Decimal::new(20005, 1);
    for byzantine in [Decimal::from(2600), Decimal::from(1500), Decimal::from(900_000)] {
        let mut h = Harness::new();
        h.add_source(SourceClass::Push, 4);
        h.add_source(SourceClass::Push, 5);
        for (n, price) in [(1, 2000), (2, 2001), (3, 1999), (5, 2002)] {
            h.quote(n, Decimal::from(price), 0);
        }
        h.quote(4, byzantine, 0);

        let id = h.funded(one_unit());
        let agg = h.engine.initiate_settlement(id).unwrap();
        assert_eq!(agg.median, honest, "byzantine quote {byzantine}");
        assert_eq!(agg.valid_sources, 4);
        assert_eq!(h.engine.settlement(id).unwrap().initiation_price, Some(honest));
    }
}

#[test]
fn stale_quote_is_excluded_from_initiation_price() {
    let mut h = Harness::new();
    h.add_source(SourceClass::Push, 4);
    h.add_source(SourceClass::Push, 5);
    for (n, price) in [(1, 2000), (2, 2001), (3, 1999), (5, 2002)] {
        h.quote(n, Decimal::from(price), 0);
    }
    // Past the push-class bound of one hour.
    h.quote(4, Decimal::from(3000), 3_601);

    let id = h.funded(one_unit());
    let agg = h.engine.initiate_settlement(id).unwrap();
    assert_eq!(agg.median, Decimal::new(20005, 1));
    assert_eq!(agg.valid_sources, 4);
    assert_eq!(agg.outliers, 0);
    assert_eq!(
        h.engine.oracle().source(SourceId(4)).unwrap().consecutive_failures,
        1
    );
}

#[test]
fn stale_pull_source_does_not_block_push_priced_initiation() {
    let mut h = Harness::new();
    h.add_source(SourceClass::Pull, 4);
    for n in 1..=4 {
        h.quote(n, Decimal::from(2000), 61);
    }

    let id = h.funded(one_unit());
    let agg = h.engine.initiate_settlement(id).unwrap();
    assert_eq!(agg.valid_sources, 3);
    assert_eq!(agg.median, Decimal::from(2000));
    assert_eq!(h.state(id), SettlementState::Initiated);
    assert_eq!(
        h.engine.oracle().source(SourceId(4)).unwrap().consecutive_failures,
        1
    );
}

#[test]
fn unreliable_price_blocks_initiation_without_mutation() {
    let mut h = Harness::new();
    let id = h.funded(one_unit());
    h.engine
        .set_source_active(admin(), SourceId(3), false)
        .unwrap();

    let err = h.engine.initiate_settlement(id).unwrap_err();
    assert!(matches!(err, FairsettleError::PriceUnreliable { .. }));
    assert_eq!(h.state(id), SettlementState::Pending);
    assert_eq!(h.engine.queue_head(), Some(id));
    assert_eq!(h.engine.oracle().breaker_level(), BreakerLevel::Elevated);

    h.engine.set_source_active(admin(), SourceId(3), true).unwrap();
    h.engine.initiate_settlement(id).unwrap();
}

#[test]
fn price_crash_trips_breaker_until_admin_reset() {
    let mut h = Harness::new();
    let first = h.funded(one_unit());
    h.engine.initiate_settlement(first).unwrap();

    let second = h.funded(one_unit());
    h.set_price(Decimal::from(500));
    assert!(h.engine.initiate_settlement(second).is_err());
    assert!(matches!(
        h.engine.initiate_settlement(second),
        Err(FairsettleError::CircuitBreakerTripped)
    ));
    assert!(!h.engine.can_initiate(second));

    h.engine.reset_circuit_breaker(admin()).unwrap();
    let agg = h.engine.initiate_settlement(second).unwrap();
    assert_eq!(agg.median, Decimal::from(500));
}

#[test]
fn paused_protocol_rejects_settlement_surface() {
    let mut h = Harness::new();
    let id = h.funded(one_unit());
    h.engine.pause(admin()).unwrap();
    assert!(matches!(
        h.engine.initiate_settlement(id),
        Err(FairsettleError::Paused)
    ));
    assert!(matches!(
        h.engine.commit(alice(), CommitmentHash([1u8; 32])),
        Err(FairsettleError::Paused)
    ));
    h.engine.unpause(admin()).unwrap();
    h.engine.initiate_settlement(id).unwrap();
}

#[test]
fn events_record_the_lifecycle() {
    let mut h = Harness::new();
    let id = h.funded(one_unit());
    h.engine.initiate_settlement(id).unwrap();
    h.advance(3);
    h.engine.execute_settlement(id, 1).unwrap();

    let kinds: Vec<&EventPayload> = h.engine.events().events().iter().map(|e| &e.payload).collect();
    let position = |pred: fn(&EventPayload) -> bool| kinds.iter().position(|p| pred(p)).unwrap();
    let created = position(|p| matches!(p, EventPayload::SettlementCreated { .. }));
    let deposited = position(|p| matches!(p, EventPayload::Deposited { .. }));
    let initiated = position(|p| matches!(p, EventPayload::SettlementInitiated { .. }));
    let finalized = position(|p| matches!(p, EventPayload::SettlementFinalized { .. }));
    assert!(created < deposited && deposited < initiated && initiated < finalized);

    let seqs: Vec<u64> = h.engine.events().events().iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));

    let json = serde_json::to_string(h.engine.events().events()).unwrap();
    assert!(json.contains("SettlementFinalized"));
}
