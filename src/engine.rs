//! Roster accounting for a pooled-funds cash game.
//!
//! Pure state machine: no accounts, no CPI. The program wrapper loads a
//! [`CashGame`] from the record, runs one transition on a working copy, moves
//! tokens to match what the transition reports, and only then writes the copy
//! back. Every transition either succeeds completely or leaves `self` intact.

use alloc::vec::Vec;
use num_derive::FromPrimitive;

pub type Address = [u8; 32];

/// Seats available in a record. `GameConfig::max_players` may not exceed it.
pub const MAX_SEATS: usize = 10;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineError {
    InvalidConfig,
    InvalidDepositAmount,
    TableFull,
    AlreadyJoined,
    Unauthorized,
    PlayerNotFound,
    InsufficientBalance,
    Overflow,
    AccountMismatch,
    DuplicateSettlement,
    UnbalancedSettlement,
    GameNotEmpty,
    GameNotActive,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GameConfig {
    pub min_deposit: u64,
    pub max_deposit: u64,
    pub max_players: u16,
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_players == 0 || self.max_players as usize > MAX_SEATS {
            return Err(EngineError::InvalidConfig);
        }
        if self.min_deposit > self.max_deposit {
            return Err(EngineError::InvalidConfig);
        }
        Ok(())
    }

    /// Inclusive on both ends.
    pub fn accepts(&self, amount: u64) -> bool {
        self.min_deposit <= amount && amount <= self.max_deposit
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, FromPrimitive)]
pub enum GameStatus {
    #[default]
    Inactive = 0,
    Active = 1,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Player {
    pub address: Address,
    /// Chips at the table.
    pub balance: u64,
    /// Chips bought while the game was active, not yet at the table.
    pub add_on: u64,
}

impl Player {
    /// Everything escrow holds for this player.
    pub fn stake(&self) -> Result<u64, EngineError> {
        self.balance.checked_add(self.add_on).ok_or(EngineError::Overflow)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SettleOp {
    Add(u64),
    Sub(u64),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Settlement {
    pub address: Address,
    pub op: SettleOp,
}

/// Amount owed to a player removed by settlement.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Payout {
    pub address: Address,
    pub amount: u64,
}

/// Result of partitioning the roster against a settlement batch.
///
/// `kept` is the new roster with deltas applied, `payouts` lists the removed
/// players in roster order. Nothing has been mutated yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SettlementPlan {
    pub kept: Vec<Player>,
    pub payouts: Vec<Payout>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CashGame {
    pub owner: Address,
    pub config: GameConfig,
    pub status: GameStatus,
    pub players: Vec<Player>,
}

impl CashGame {
    pub fn new(owner: Address, config: GameConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            owner,
            config,
            status: GameStatus::Inactive,
            players: Vec::with_capacity(config.max_players as usize),
        })
    }

    pub fn require_owner(&self, caller: &Address) -> Result<(), EngineError> {
        if self.owner != *caller {
            return Err(EngineError::Unauthorized);
        }
        Ok(())
    }

    pub fn position(&self, address: &Address) -> Option<usize> {
        self.players.iter().position(|p| p.address == *address)
    }

    pub fn player(&self, address: &Address) -> Option<&Player> {
        self.players.iter().find(|p| p.address == *address)
    }

    /// Sum of every seat's balance and add-on; what escrow must hold.
    pub fn escrowed_total(&self) -> Result<u64, EngineError> {
        self.players.iter().try_fold(0u64, |acc, p| {
            acc.checked_add(p.stake()?).ok_or(EngineError::Overflow)
        })
    }

    pub fn join(&mut self, address: Address, amount: u64) -> Result<(), EngineError> {
        if self.players.len() >= self.config.max_players as usize {
            return Err(EngineError::TableFull);
        }
        if !self.config.accepts(amount) {
            return Err(EngineError::InvalidDepositAmount);
        }
        if self.position(&address).is_some() {
            return Err(EngineError::AlreadyJoined);
        }
        self.players.push(Player { address, balance: amount, add_on: 0 });
        Ok(())
    }

    /// Going inactive moves every pending add-on onto the table.
    pub fn set_status(&mut self, caller: &Address, status: GameStatus) -> Result<(), EngineError> {
        self.require_owner(caller)?;
        if status == GameStatus::Inactive {
            let mut folded = self.players.clone();
            for p in folded.iter_mut() {
                p.balance = p.balance.checked_add(p.add_on).ok_or(EngineError::Overflow)?;
                p.add_on = 0;
            }
            self.players = folded;
        }
        self.status = status;
        Ok(())
    }

    pub fn add_chips(&mut self, address: &Address, amount: u64) -> Result<(), EngineError> {
        let idx = self.position(address).ok_or(EngineError::PlayerNotFound)?;
        // a single top-up is capped like a buy-in
        if amount == 0 || amount > self.config.max_deposit {
            return Err(EngineError::InvalidDepositAmount);
        }
        let player = &mut self.players[idx];
        match self.status {
            GameStatus::Inactive => {
                player.balance = player.balance.checked_add(amount).ok_or(EngineError::Overflow)?;
            }
            GameStatus::Active => {
                player.add_on = player.add_on.checked_add(amount).ok_or(EngineError::Overflow)?;
            }
        }
        Ok(())
    }

    /// First pass of settlement: validate the batch and partition the roster.
    ///
    /// Referenced players keep their seat with the delta applied; everyone
    /// else is removed and owed `balance + add_on`, in roster order.
    /// Only an active game settles.
    pub fn plan_settlement(
        &self,
        caller: &Address,
        settlements: &[Settlement],
    ) -> Result<SettlementPlan, EngineError> {
        self.require_owner(caller)?;
        if self.status != GameStatus::Active {
            return Err(EngineError::GameNotActive);
        }

        for (i, s) in settlements.iter().enumerate() {
            if self.position(&s.address).is_none() {
                return Err(EngineError::PlayerNotFound);
            }
            if settlements[..i].iter().any(|prev| prev.address == s.address) {
                return Err(EngineError::DuplicateSettlement);
            }
        }

        let mut credited = 0u64;
        let mut debited = 0u64;
        let mut kept = Vec::with_capacity(self.players.len());
        let mut payouts = Vec::new();

        for player in self.players.iter() {
            match settlements.iter().find(|s| s.address == player.address) {
                Some(s) => {
                    let mut p = *player;
                    match s.op {
                        SettleOp::Add(amount) => {
                            p.balance = p.balance.checked_add(amount).ok_or(EngineError::Overflow)?;
                            credited = credited.checked_add(amount).ok_or(EngineError::Overflow)?;
                        }
                        SettleOp::Sub(amount) => {
                            p.balance = p
                                .balance
                                .checked_sub(amount)
                                .ok_or(EngineError::InsufficientBalance)?;
                            debited = debited.checked_add(amount).ok_or(EngineError::Overflow)?;
                        }
                    }
                    kept.push(p);
                }
                None => payouts.push(Payout {
                    address: player.address,
                    amount: player.stake()?,
                }),
            }
        }

        if credited != debited {
            return Err(EngineError::UnbalancedSettlement);
        }
        Ok(SettlementPlan { kept, payouts })
    }

    /// Second pass: the caller supplied `destinations` payout accounts, which
    /// must match the removed set one-for-one. Returns the payouts in the
    /// order destinations are consumed.
    pub fn settle(
        &mut self,
        caller: &Address,
        settlements: &[Settlement],
        destinations: usize,
    ) -> Result<Vec<Payout>, EngineError> {
        let plan = self.plan_settlement(caller, settlements)?;
        if plan.payouts.len() != destinations {
            return Err(EngineError::AccountMismatch);
        }
        self.players = plan.kept;
        Ok(plan.payouts)
    }

    pub fn close(&self, caller: &Address) -> Result<(), EngineError> {
        self.require_owner(caller)?;
        if !self.players.is_empty() {
            return Err(EngineError::GameNotEmpty);
        }
        Ok(())
    }
}
