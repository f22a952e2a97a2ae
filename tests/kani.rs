//! Kani harnesses for the roster engine.
//!
//! Run with: `cargo kani --tests`
//!
//! Proves owner gating, the deposit window, and that successful transitions
//! never change the amount escrow is owed except by the tokens they move.
//! Token CPI and account validation are not modeled.

#![cfg(kani)]

extern crate kani;

use cash_game_escrow::engine::{
    Address, CashGame, EngineError, GameConfig, GameStatus, Player, SettleOp, Settlement,
};

const OWNER: Address = [1u8; 32];
const P1: Address = [2u8; 32];
const P2: Address = [3u8; 32];

fn any_config() -> GameConfig {
    GameConfig { min_deposit: kani::any(), max_deposit: kani::any(), max_players: kani::any() }
}

fn any_player(address: Address) -> Player {
    let balance: u64 = kani::any();
    let add_on: u64 = kani::any();
    kani::assume(balance.checked_add(add_on).is_some());
    Player { address, balance, add_on }
}

/// Two seated players with symbolic balances, owned by OWNER.
fn two_seat_game() -> CashGame {
    let status = if kani::any() { GameStatus::Active } else { GameStatus::Inactive };
    let game = CashGame {
        owner: OWNER,
        config: GameConfig { min_deposit: 1, max_deposit: u64::MAX, max_players: 2 },
        status,
        players: vec![any_player(P1), any_player(P2)],
    };
    kani::assume(game.escrowed_total().is_ok());
    game
}

// =============================================================================
// A. CONFIG / JOIN
// =============================================================================

/// Prove: a created game always has a legal config
#[kani::proof]
fn proof_new_game_config_valid() {
    let config = any_config();
    if let Ok(game) = CashGame::new(OWNER, config) {
        assert!(game.config.max_players >= 1);
        assert!(game.config.max_players as usize <= cash_game_escrow::engine::MAX_SEATS);
        assert!(game.config.min_deposit <= game.config.max_deposit);
        assert!(game.players.is_empty());
    }
}

/// Prove: join succeeds only inside the deposit window and seats exactly the deposit
#[kani::proof]
fn proof_join_respects_window() {
    let config = GameConfig { min_deposit: kani::any(), max_deposit: kani::any(), max_players: 1 };
    kani::assume(config.min_deposit <= config.max_deposit);
    let mut game = CashGame::new(OWNER, config).unwrap();
    let amount: u64 = kani::any();

    match game.join(P1, amount) {
        Ok(()) => {
            assert!(config.min_deposit <= amount && amount <= config.max_deposit);
            assert_eq!(game.escrowed_total(), Ok(amount));
        }
        Err(e) => {
            assert_eq!(e, EngineError::InvalidDepositAmount);
            assert!(game.players.is_empty());
        }
    }
}

/// Prove: a full table rejects every join, whatever the amount
#[kani::proof]
#[kani::unwind(4)]
fn proof_join_capacity() {
    let mut game = two_seat_game();
    let before = game.clone();
    let who: Address = kani::any();
    let amount: u64 = kani::any();
    assert_eq!(game.join(who, amount), Err(EngineError::TableFull));
    assert_eq!(game, before);
}

// =============================================================================
// B. OWNER GATING
// =============================================================================

/// Prove: only the owner can change status, and a rejected call changes nothing
#[kani::proof]
#[kani::unwind(4)]
fn proof_set_status_owner_only() {
    let mut game = two_seat_game();
    let before = game.clone();
    let caller: Address = if kani::any() { OWNER } else { P1 };

    let r = game.set_status(&caller, GameStatus::Active);
    if caller != OWNER {
        assert_eq!(r, Err(EngineError::Unauthorized));
        assert_eq!(game, before);
    }
}

/// Prove: non-owner settlement is always rejected
#[kani::proof]
#[kani::unwind(4)]
fn proof_settle_owner_only() {
    let mut game = two_seat_game();
    let before = game.clone();
    let r = game.settle(&P2, &[], 2);
    assert_eq!(r, Err(EngineError::Unauthorized));
    assert_eq!(game, before);
}

/// Prove: an inactive game never settles, whatever the batch
#[kani::proof]
#[kani::unwind(4)]
fn proof_settle_requires_active() {
    let mut game = two_seat_game();
    game.status = GameStatus::Inactive;
    let before = game.clone();
    let x: u64 = kani::any();
    let batch = [Settlement { address: P1, op: SettleOp::Sub(x) }];
    let destinations: usize = kani::any();
    assert_eq!(game.settle(&OWNER, &batch, destinations), Err(EngineError::GameNotActive));
    assert_eq!(game, before);
}

/// Prove: a top-up above the deposit cap is always rejected
#[kani::proof]
#[kani::unwind(4)]
fn proof_add_chips_capped() {
    let mut game = two_seat_game();
    game.config.max_deposit = kani::any();
    let before = game.clone();
    let amount: u64 = kani::any();
    kani::assume(amount > game.config.max_deposit);
    assert_eq!(game.add_chips(&P1, amount), Err(EngineError::InvalidDepositAmount));
    assert_eq!(game, before);
}

// =============================================================================
// C. CONSERVATION
// =============================================================================

/// Prove: folding add-ons never changes what escrow is owed
#[kani::proof]
#[kani::unwind(4)]
fn proof_fold_preserves_total() {
    let mut game = two_seat_game();
    let total = game.escrowed_total().unwrap();
    if game.set_status(&OWNER, GameStatus::Inactive).is_ok() {
        assert_eq!(game.escrowed_total(), Ok(total));
        assert!(game.players.iter().all(|p| p.add_on == 0));
    }
}

/// Prove: add-chips raises the total by exactly the amount deposited
#[kani::proof]
#[kani::unwind(4)]
fn proof_add_chips_adds_exactly() {
    let mut game = two_seat_game();
    let total = game.escrowed_total().unwrap();
    let amount: u64 = kani::any();
    if game.add_chips(&P1, amount).is_ok() {
        assert_eq!(game.escrowed_total(), total.checked_add(amount).ok_or(EngineError::Overflow));
        assert!(amount > 0);
    }
}

/// Prove: a balanced batch between the two seats keeps the total
#[kani::proof]
#[kani::unwind(4)]
fn proof_transfer_batch_preserves_total() {
    let mut game = two_seat_game();
    let total = game.escrowed_total().unwrap();
    let x: u64 = kani::any();
    let batch = [
        Settlement { address: P1, op: SettleOp::Sub(x) },
        Settlement { address: P2, op: SettleOp::Add(x) },
    ];
    if let Ok(payouts) = game.settle(&OWNER, &batch, 0) {
        assert!(payouts.is_empty());
        assert_eq!(game.escrowed_total(), Ok(total));
    }
}

/// Prove: removing a seat pays out exactly what it held
#[kani::proof]
#[kani::unwind(4)]
fn proof_removal_pays_stake() {
    let mut game = two_seat_game();
    game.status = GameStatus::Active;
    let total = game.escrowed_total().unwrap();
    let p2_stake = game.players[1].stake().unwrap();
    let batch = [Settlement { address: P1, op: SettleOp::Add(0) }];

    let payouts = game.settle(&OWNER, &batch, 1).unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].address, P2);
    assert_eq!(payouts[0].amount, p2_stake);
    assert_eq!(game.escrowed_total(), Ok(total - p2_stake));
}

/// Prove: close only passes for the owner on an empty table
#[kani::proof]
#[kani::unwind(4)]
fn proof_close_requires_empty() {
    let game = two_seat_game();
    assert_eq!(game.close(&OWNER), Err(EngineError::GameNotEmpty));
    let empty = CashGame { players: vec![], ..game };
    assert_eq!(empty.close(&OWNER), Ok(()));
    assert_eq!(empty.close(&P1), Err(EngineError::Unauthorized));
}
