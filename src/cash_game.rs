//! Cash game escrow: single-file Solana program with an embedded roster engine.
//!
//! Players deposit SPL tokens into a per-game escrow owned by a program-derived
//! authority. The game owner adjusts balances in batches and cashes players
//! out; the roster total never exceeds what escrow holds.

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

use solana_program::declare_id;

declare_id!("CashGame11111111111111111111111111111111111");

pub mod engine;

// 1. mod constants
pub mod constants {
    use core::mem::size_of;
    use crate::state::{ConfigSegment, GameHeader, SeatSegment, TableSegment};

    pub use crate::engine::MAX_SEATS;

    pub const MAGIC: u64 = 0x4341534847414d45; // "CASHGAME"
    pub const VERSION: u32 = 1;

    pub const ESCROW_SEED: &[u8] = b"escrow";

    pub const HEADER_LEN: usize = size_of::<GameHeader>();
    pub const CONFIG_OFF: usize = HEADER_LEN;
    pub const CONFIG_LEN: usize = size_of::<ConfigSegment>();
    pub const TABLE_OFF: usize = CONFIG_OFF + CONFIG_LEN;
    pub const TABLE_LEN: usize = size_of::<TableSegment>();
    pub const ROSTER_OFF: usize = TABLE_OFF + TABLE_LEN;
    pub const SEAT_LEN: usize = size_of::<SeatSegment>();
    pub const RECORD_LEN: usize = ROSTER_OFF + SEAT_LEN * MAX_SEATS;

    /// A batch can reference each seat at most once.
    pub const MAX_SETTLEMENTS: usize = MAX_SEATS;
}

// 2. mod error
pub mod error {
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive;
    use solana_program::program_error::ProgramError;
    use crate::engine::EngineError;

    #[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
    pub enum CashGameError {
        NotInitialized,
        AlreadyInitialized,
        InvalidVersion,
        InvalidRecordLen,
        InvalidEscrowAccount,
        InvalidEscrowAuthority,
        InvalidMint,
        InvalidTokenAccount,
        InvalidTokenProgram,
        ExpectedSigner,
        ExpectedWritable,
        EscrowNotEmpty,
        /// Escrow holds less than the roster is owed.
        EscrowShortfall,
        // Engine errors mapped:
        InvalidConfig,
        InvalidDepositAmount,
        TableFull,
        AlreadyJoined,
        Unauthorized,
        PlayerNotFound,
        InsufficientBalance,
        ArithmeticOverflow,
        AccountMismatch,
        DuplicateSettlement,
        UnbalancedSettlement,
        GameNotEmpty,
        GameNotActive,
    }

    impl CashGameError {
        /// Recover the variant from a failed instruction's error.
        pub fn decode(e: &ProgramError) -> Option<Self> {
            match e {
                ProgramError::Custom(code) => Self::from_u32(*code),
                _ => None,
            }
        }
    }

    impl From<CashGameError> for ProgramError {
        fn from(e: CashGameError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }

    pub fn map_engine_error(e: EngineError) -> ProgramError {
        let err = match e {
            EngineError::InvalidConfig => CashGameError::InvalidConfig,
            EngineError::InvalidDepositAmount => CashGameError::InvalidDepositAmount,
            EngineError::TableFull => CashGameError::TableFull,
            EngineError::AlreadyJoined => CashGameError::AlreadyJoined,
            EngineError::Unauthorized => CashGameError::Unauthorized,
            EngineError::PlayerNotFound => CashGameError::PlayerNotFound,
            EngineError::InsufficientBalance => CashGameError::InsufficientBalance,
            EngineError::Overflow => CashGameError::ArithmeticOverflow,
            EngineError::AccountMismatch => CashGameError::AccountMismatch,
            EngineError::DuplicateSettlement => CashGameError::DuplicateSettlement,
            EngineError::UnbalancedSettlement => CashGameError::UnbalancedSettlement,
            EngineError::GameNotEmpty => CashGameError::GameNotEmpty,
            EngineError::GameNotActive => CashGameError::GameNotActive,
        };
        ProgramError::Custom(err as u32)
    }
}

// 3. mod ix
pub mod ix {
    use alloc::{vec, vec::Vec};
    use num_traits::FromPrimitive;
    use solana_program::program_error::ProgramError;
    use crate::constants::MAX_SETTLEMENTS;
    use crate::engine::{Address, GameConfig, GameStatus, SettleOp, Settlement};

    const OP_ADD: u8 = 0;
    const OP_SUB: u8 = 1;

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub enum Instruction {
        CreateGame { config: GameConfig },
        JoinGame { amount: u64 },
        SetStatus { status: GameStatus },
        AddChips { amount: u64 },
        Settle { settlements: Vec<Settlement> },
        CloseGame,
    }

    impl Instruction {
        pub fn decode(input: &[u8]) -> Result<Self, ProgramError> {
            let (&tag, mut rest) = input.split_first().ok_or(ProgramError::InvalidInstructionData)?;

            let ix = match tag {
                0 => { // CreateGame
                    let min_deposit = read_u64(&mut rest)?;
                    let max_deposit = read_u64(&mut rest)?;
                    let max_players = read_u16(&mut rest)?;
                    Instruction::CreateGame {
                        config: GameConfig { min_deposit, max_deposit, max_players },
                    }
                },
                1 => Instruction::JoinGame { amount: read_u64(&mut rest)? },
                2 => {
                    let status = GameStatus::from_u8(read_u8(&mut rest)?)
                        .ok_or(ProgramError::InvalidInstructionData)?;
                    Instruction::SetStatus { status }
                },
                3 => Instruction::AddChips { amount: read_u64(&mut rest)? },
                4 => { // Settle
                    let count = read_u16(&mut rest)? as usize;
                    if count > MAX_SETTLEMENTS {
                        return Err(ProgramError::InvalidInstructionData);
                    }
                    let mut settlements = Vec::with_capacity(count);
                    for _ in 0..count {
                        let address = read_address(&mut rest)?;
                        let op = match read_u8(&mut rest)? {
                            OP_ADD => SettleOp::Add(read_u64(&mut rest)?),
                            OP_SUB => SettleOp::Sub(read_u64(&mut rest)?),
                            _ => return Err(ProgramError::InvalidInstructionData),
                        };
                        settlements.push(Settlement { address, op });
                    }
                    Instruction::Settle { settlements }
                },
                5 => Instruction::CloseGame,
                _ => return Err(ProgramError::InvalidInstructionData),
            };
            Ok(ix)
        }

        pub fn encode(&self) -> Vec<u8> {
            match self {
                Instruction::CreateGame { config } => {
                    let mut data = vec![0u8];
                    data.extend_from_slice(&config.min_deposit.to_le_bytes());
                    data.extend_from_slice(&config.max_deposit.to_le_bytes());
                    data.extend_from_slice(&config.max_players.to_le_bytes());
                    data
                },
                Instruction::JoinGame { amount } => {
                    let mut data = vec![1u8];
                    data.extend_from_slice(&amount.to_le_bytes());
                    data
                },
                Instruction::SetStatus { status } => vec![2u8, *status as u8],
                Instruction::AddChips { amount } => {
                    let mut data = vec![3u8];
                    data.extend_from_slice(&amount.to_le_bytes());
                    data
                },
                Instruction::Settle { settlements } => {
                    let mut data = Vec::with_capacity(3 + settlements.len() * 41);
                    data.push(4u8);
                    data.extend_from_slice(&(settlements.len() as u16).to_le_bytes());
                    for s in settlements {
                        data.extend_from_slice(&s.address);
                        let (op, amount) = match s.op {
                            SettleOp::Add(amount) => (OP_ADD, amount),
                            SettleOp::Sub(amount) => (OP_SUB, amount),
                        };
                        data.push(op);
                        data.extend_from_slice(&amount.to_le_bytes());
                    }
                    data
                },
                Instruction::CloseGame => vec![5u8],
            }
        }
    }

    fn read_u8(input: &mut &[u8]) -> Result<u8, ProgramError> {
        let (&val, rest) = input.split_first().ok_or(ProgramError::InvalidInstructionData)?;
        *input = rest;
        Ok(val)
    }

    fn read_u16(input: &mut &[u8]) -> Result<u16, ProgramError> {
        let bytes = take::<2>(input)?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_u64(input: &mut &[u8]) -> Result<u64, ProgramError> {
        let bytes = take::<8>(input)?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_address(input: &mut &[u8]) -> Result<Address, ProgramError> {
        take::<32>(input)
    }

    fn take<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], ProgramError> {
        if input.len() < N { return Err(ProgramError::InvalidInstructionData); }
        let (bytes, rest) = input.split_at(N);
        *input = rest;
        bytes.try_into().map_err(|_| ProgramError::InvalidInstructionData)
    }
}

// 4. mod accounts
pub mod accounts {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};
    use crate::{constants::ESCROW_SEED, error::CashGameError};

    pub fn expect_len(accounts: &[AccountInfo], n: usize) -> Result<(), ProgramError> {
        if accounts.len() < n {
            return Err(ProgramError::NotEnoughAccountKeys);
        }
        Ok(())
    }

    pub fn expect_signer(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_signer {
            return Err(CashGameError::ExpectedSigner.into());
        }
        Ok(())
    }

    pub fn expect_writable(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_writable {
            return Err(CashGameError::ExpectedWritable.into());
        }
        Ok(())
    }

    pub fn expect_owner(ai: &AccountInfo, owner: &Pubkey) -> Result<(), ProgramError> {
        if ai.owner != owner {
            return Err(ProgramError::IllegalOwner);
        }
        Ok(())
    }

    pub fn expect_token_program(ai: &AccountInfo) -> Result<(), ProgramError> {
        if ai.key != &spl_token::ID {
            return Err(CashGameError::InvalidTokenProgram.into());
        }
        Ok(())
    }

    pub fn derive_escrow_authority(program_id: &Pubkey, record_key: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[ESCROW_SEED, record_key.as_ref()], program_id)
    }

    /// Re-derive the authority from the bump stored at creation.
    pub fn escrow_authority(program_id: &Pubkey, record_key: &Pubkey, bump: u8) -> Result<Pubkey, ProgramError> {
        Pubkey::create_program_address(&[ESCROW_SEED, record_key.as_ref(), &[bump]], program_id)
            .map_err(|_| CashGameError::InvalidEscrowAuthority.into())
    }
}

// 5. mod state
pub mod state {
    use alloc::vec::Vec;
    use bytemuck::{Pod, Zeroable};
    use core::cell::RefMut;
    use core::mem::size_of;
    use num_traits::FromPrimitive;
    use solana_program::{account_info::AccountInfo, program_error::ProgramError};
    use crate::constants::{
        CONFIG_OFF, MAGIC, MAX_SEATS, RECORD_LEN, ROSTER_OFF, SEAT_LEN, TABLE_OFF, VERSION,
    };
    use crate::engine::{CashGame, GameConfig, GameStatus, Player};
    use crate::error::CashGameError;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct GameHeader {
        pub magic: u64,
        pub version: u32,
        pub escrow_bump: u8,
        pub _padding: [u8; 3],
        pub owner: [u8; 32],
        pub mint: [u8; 32],
        pub escrow: [u8; 32],
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct ConfigSegment {
        pub min_deposit: u64,
        pub max_deposit: u64,
        pub max_players: u16,
        pub _padding: [u8; 6],
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct TableSegment {
        pub status: u8,
        pub _padding: [u8; 5],
        pub player_count: u16,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct SeatSegment {
        pub address: [u8; 32],
        pub balance: u64,
        pub add_on: u64,
    }

    pub fn record_data_mut<'a, 'b>(ai: &'b AccountInfo<'a>) -> Result<RefMut<'b, &'a mut [u8]>, ProgramError> {
        Ok(ai.try_borrow_mut_data()?)
    }

    fn read_segment<T: Pod>(data: &[u8], off: usize) -> T {
        let mut v = T::zeroed();
        bytemuck::bytes_of_mut(&mut v).copy_from_slice(&data[off..off + size_of::<T>()]);
        v
    }

    fn write_segment<T: Pod>(data: &mut [u8], off: usize, v: &T) {
        data[off..off + size_of::<T>()].copy_from_slice(bytemuck::bytes_of(v));
    }

    pub fn read_header(data: &[u8]) -> GameHeader {
        read_segment(data, 0)
    }

    pub fn write_header(data: &mut [u8], h: &GameHeader) {
        write_segment(data, 0, h);
    }

    /// Header of a live record; anything else reads as "does not exist".
    pub fn require_initialized(data: &[u8]) -> Result<GameHeader, ProgramError> {
        if data.len() != RECORD_LEN { return Err(CashGameError::InvalidRecordLen.into()); }
        let h = read_header(data);
        if h.magic != MAGIC { return Err(CashGameError::NotInitialized.into()); }
        if h.version != VERSION { return Err(CashGameError::InvalidVersion.into()); }
        Ok(h)
    }

    pub fn load_game(data: &[u8]) -> Result<(GameHeader, CashGame), ProgramError> {
        let header = require_initialized(data)?;

        let c: ConfigSegment = read_segment(data, CONFIG_OFF);
        let t: TableSegment = read_segment(data, TABLE_OFF);
        let status = GameStatus::from_u8(t.status).ok_or(ProgramError::InvalidAccountData)?;
        let count = t.player_count as usize;
        if count > MAX_SEATS {
            return Err(ProgramError::InvalidAccountData);
        }

        let mut players = Vec::with_capacity(count);
        for i in 0..count {
            let s: SeatSegment = read_segment(data, ROSTER_OFF + i * SEAT_LEN);
            players.push(Player { address: s.address, balance: s.balance, add_on: s.add_on });
        }

        let game = CashGame {
            owner: header.owner,
            config: GameConfig {
                min_deposit: c.min_deposit,
                max_deposit: c.max_deposit,
                max_players: c.max_players,
            },
            status,
            players,
        };
        Ok((header, game))
    }

    /// Write the mutable part of the record: status and roster.
    pub fn store_game(data: &mut [u8], game: &CashGame) -> Result<(), ProgramError> {
        if data.len() != RECORD_LEN { return Err(CashGameError::InvalidRecordLen.into()); }
        if game.players.len() > MAX_SEATS { return Err(ProgramError::InvalidAccountData); }

        let table = TableSegment {
            status: game.status as u8,
            _padding: [0; 5],
            player_count: game.players.len() as u16,
        };
        write_segment(data, TABLE_OFF, &table);

        for i in 0..MAX_SEATS {
            let seat = match game.players.get(i) {
                Some(p) => SeatSegment { address: p.address, balance: p.balance, add_on: p.add_on },
                None => SeatSegment::zeroed(),
            };
            write_segment(data, ROSTER_OFF + i * SEAT_LEN, &seat);
        }
        Ok(())
    }

    pub fn init_game(data: &mut [u8], header: &GameHeader, game: &CashGame) -> Result<(), ProgramError> {
        if data.len() != RECORD_LEN { return Err(CashGameError::InvalidRecordLen.into()); }
        data.fill(0);
        write_header(data, header);
        let config = ConfigSegment {
            min_deposit: game.config.min_deposit,
            max_deposit: game.config.max_deposit,
            max_players: game.config.max_players,
            _padding: [0; 6],
        };
        write_segment(data, CONFIG_OFF, &config);
        store_game(data, game)
    }

    /// Hand every lamport of the record to `dest` and wipe its data.
    pub fn reclaim(record: &AccountInfo, dest: &AccountInfo) -> Result<(), ProgramError> {
        let lamports = record.lamports();
        let total = dest.lamports().checked_add(lamports).ok_or(CashGameError::ArithmeticOverflow)?;
        **dest.try_borrow_mut_lamports()? = total;
        **record.try_borrow_mut_lamports()? = 0;
        record.try_borrow_mut_data()?.fill(0);
        Ok(())
    }
}

// 6. mod ledger
pub mod ledger {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};
    use crate::accounts;
    use crate::error::CashGameError;

    #[cfg(not(any(test, feature = "test")))]
    use solana_program::program::{invoke, invoke_signed};
    #[cfg(not(any(test, feature = "test")))]
    use crate::constants::ESCROW_SEED;

    #[cfg(any(test, feature = "test"))]
    use solana_program::program_pack::Pack;
    #[cfg(any(test, feature = "test"))]
    use spl_token::state::Account as TokenAccount;

    /// Authority to move tokens out of one game's escrow.
    ///
    /// Can only be built inside this crate, and only for the PDA recorded at
    /// creation; the processor builds one for Settle and CloseGame.
    pub struct EscrowSigner<'a, 'b> {
        authority: &'b AccountInfo<'a>,
        #[cfg_attr(any(test, feature = "test"), allow(dead_code))]
        record: Pubkey,
        #[cfg_attr(any(test, feature = "test"), allow(dead_code))]
        bump: [u8; 1],
    }

    impl<'a, 'b> EscrowSigner<'a, 'b> {
        pub(crate) fn new(
            program_id: &Pubkey,
            record: &Pubkey,
            authority: &'b AccountInfo<'a>,
            bump: u8,
        ) -> Result<Self, ProgramError> {
            let expected = accounts::escrow_authority(program_id, record, bump)?;
            if *authority.key != expected {
                return Err(CashGameError::InvalidEscrowAuthority.into());
            }
            Ok(Self { authority, record: *record, bump: [bump] })
        }

        pub fn key(&self) -> &Pubkey {
            self.authority.key
        }
    }

    /// Player-signed transfer from a holding account into escrow.
    pub fn deposit<'a>(
        _token_program: &AccountInfo<'a>,
        source: &AccountInfo<'a>,
        escrow: &AccountInfo<'a>,
        authority: &AccountInfo<'a>,
        amount: u64,
    ) -> Result<(), ProgramError> {
        if amount == 0 {
            return Ok(());
        }
        #[cfg(not(any(test, feature = "test")))]
        {
            let ix = spl_token::instruction::transfer(
                _token_program.key,
                source.key,
                escrow.key,
                authority.key,
                &[],
                amount,
            )?;
            invoke(&ix, &[source.clone(), escrow.clone(), authority.clone(), _token_program.clone()])
        }
        #[cfg(any(test, feature = "test"))]
        {
            check_owner(source, authority.key)?;
            move_tokens(source, escrow, amount)
        }
    }

    /// Escrow-signed transfer out to `dest`.
    pub fn release<'a>(
        _token_program: &AccountInfo<'a>,
        escrow: &AccountInfo<'a>,
        dest: &AccountInfo<'a>,
        signer: &EscrowSigner<'a, '_>,
        amount: u64,
    ) -> Result<(), ProgramError> {
        if amount == 0 {
            return Ok(());
        }
        #[cfg(not(any(test, feature = "test")))]
        {
            let ix = spl_token::instruction::transfer(
                _token_program.key,
                escrow.key,
                dest.key,
                signer.key(),
                &[],
                amount,
            )?;
            let seeds: [&[u8]; 3] = [ESCROW_SEED, signer.record.as_ref(), &signer.bump];
            invoke_signed(
                &ix,
                &[escrow.clone(), dest.clone(), signer.authority.clone(), _token_program.clone()],
                &[&seeds],
            )
        }
        #[cfg(any(test, feature = "test"))]
        {
            check_owner(escrow, signer.key())?;
            move_tokens(escrow, dest, amount)
        }
    }

    /// Close the (empty) escrow token account, sending its rent to `dest`.
    pub fn close_escrow<'a>(
        _token_program: &AccountInfo<'a>,
        escrow: &AccountInfo<'a>,
        dest: &AccountInfo<'a>,
        signer: &EscrowSigner<'a, '_>,
    ) -> Result<(), ProgramError> {
        #[cfg(not(any(test, feature = "test")))]
        {
            let ix = spl_token::instruction::close_account(
                _token_program.key,
                escrow.key,
                dest.key,
                signer.key(),
                &[],
            )?;
            let seeds: [&[u8]; 3] = [ESCROW_SEED, signer.record.as_ref(), &signer.bump];
            invoke_signed(
                &ix,
                &[escrow.clone(), dest.clone(), signer.authority.clone(), _token_program.clone()],
                &[&seeds],
            )
        }
        #[cfg(any(test, feature = "test"))]
        {
            check_owner(escrow, signer.key())?;
            {
                let data = escrow.try_borrow_data()?;
                if TokenAccount::unpack(&data)?.amount != 0 {
                    return Err(spl_token::error::TokenError::NonNativeHasBalance.into());
                }
            }
            let lamports = escrow.lamports();
            let total = dest.lamports().checked_add(lamports).ok_or(ProgramError::ArithmeticOverflow)?;
            **dest.try_borrow_mut_lamports()? = total;
            **escrow.try_borrow_mut_lamports()? = 0;
            escrow.try_borrow_mut_data()?.fill(0);
            Ok(())
        }
    }

    #[cfg(any(test, feature = "test"))]
    fn check_owner(account: &AccountInfo, authority: &Pubkey) -> Result<(), ProgramError> {
        let data = account.try_borrow_data()?;
        if TokenAccount::unpack(&data)?.owner != *authority {
            return Err(spl_token::error::TokenError::OwnerMismatch.into());
        }
        Ok(())
    }

    #[cfg(any(test, feature = "test"))]
    fn move_tokens(source: &AccountInfo, dest: &AccountInfo, amount: u64) -> Result<(), ProgramError> {
        let mut src_data = source.try_borrow_mut_data()?;
        let mut src_state = TokenAccount::unpack(&src_data)?;
        src_state.amount = src_state.amount.checked_sub(amount).ok_or(ProgramError::InsufficientFunds)?;
        TokenAccount::pack(src_state, &mut src_data)?;

        let mut dst_data = dest.try_borrow_mut_data()?;
        let mut dst_state = TokenAccount::unpack(&dst_data)?;
        dst_state.amount = dst_state.amount.checked_add(amount).ok_or(ProgramError::InvalidAccountData)?;
        TokenAccount::pack(dst_state, &mut dst_data)?;
        Ok(())
    }
}

// 7. mod processor
pub mod processor {
    #[allow(unused_imports)]
    use alloc::format;
    use solana_program::{
        account_info::AccountInfo, entrypoint::ProgramResult, msg, program_error::ProgramError,
        program_pack::Pack, pubkey::Pubkey,
    };
    #[cfg(feature = "cu-audit")]
    use solana_program::log::sol_log_compute_units;
    use spl_token::state::Account as TokenAccount;
    use crate::{
        accounts,
        constants::{MAGIC, RECORD_LEN, VERSION},
        engine::{CashGame, Payout},
        error::{map_engine_error, CashGameError},
        ix::Instruction,
        ledger::{self, EscrowSigner},
        state::{self, GameHeader},
    };

    fn record_guard(program_id: &Pubkey, record: &AccountInfo, data: &[u8]) -> Result<(), ProgramError> {
        accounts::expect_owner(record, program_id)?;
        if data.len() != RECORD_LEN { return Err(CashGameError::InvalidRecordLen.into()); }
        Ok(())
    }

    fn unpack_token(ai: &AccountInfo) -> Result<TokenAccount, ProgramError> {
        if ai.owner != &spl_token::ID || ai.data_len() != TokenAccount::LEN {
            return Err(CashGameError::InvalidTokenAccount.into());
        }
        let data = ai.try_borrow_data()?;
        let tok = TokenAccount::unpack(&data)?;
        Ok(tok)
    }

    /// A token account of the game's mint.
    fn unpack_holding(ai: &AccountInfo, mint: &Pubkey) -> Result<TokenAccount, ProgramError> {
        let tok = unpack_token(ai)?;
        if tok.mint != *mint { return Err(CashGameError::InvalidMint.into()); }
        Ok(tok)
    }

    fn verify_escrow(
        program_id: &Pubkey,
        record: &AccountInfo,
        escrow: &AccountInfo,
        header: &GameHeader,
    ) -> Result<TokenAccount, ProgramError> {
        if escrow.key.to_bytes() != header.escrow { return Err(CashGameError::InvalidEscrowAccount.into()); }
        let tok = unpack_token(escrow).map_err(|_| CashGameError::InvalidEscrowAccount)?;
        if tok.mint.to_bytes() != header.mint { return Err(CashGameError::InvalidMint.into()); }
        let authority = accounts::escrow_authority(program_id, record.key, header.escrow_bump)?;
        if tok.owner != authority { return Err(CashGameError::InvalidEscrowAccount.into()); }
        Ok(tok)
    }

    fn check_conservation(escrow: &AccountInfo, game: &CashGame) -> Result<(), ProgramError> {
        let held = unpack_token(escrow)?.amount;
        let owed = game.escrowed_total().map_err(map_engine_error)?;
        if held < owed { return Err(CashGameError::EscrowShortfall.into()); }
        Ok(())
    }

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        let instruction = Instruction::decode(instruction_data)?;

        match instruction {
            Instruction::CreateGame { config } => {
                msg!("Instruction: CreateGame");
                accounts::expect_len(accounts, 3)?;
                let a_owner = &accounts[0];
                let a_record = &accounts[1];
                let a_escrow = &accounts[2];

                accounts::expect_signer(a_owner)?;
                accounts::expect_writable(a_record)?;

                let mut data = state::record_data_mut(a_record)?;
                record_guard(program_id, a_record, &data)?;

                if state::read_header(&data).magic == MAGIC {
                    return Err(CashGameError::AlreadyInitialized.into());
                }

                let game = CashGame::new(a_owner.key.to_bytes(), config).map_err(map_engine_error)?;

                let (authority, bump) = accounts::derive_escrow_authority(program_id, a_record.key);
                let escrow = unpack_token(a_escrow).map_err(|_| CashGameError::InvalidEscrowAccount)?;
                if escrow.owner != authority { return Err(CashGameError::InvalidEscrowAccount.into()); }
                // nobody but the authority may move or close it
                if escrow.delegate.is_some() || escrow.close_authority.is_some() {
                    return Err(CashGameError::InvalidEscrowAccount.into());
                }
                if escrow.amount != 0 { return Err(CashGameError::EscrowNotEmpty.into()); }

                let header = GameHeader {
                    magic: MAGIC,
                    version: VERSION,
                    escrow_bump: bump,
                    _padding: [0; 3],
                    owner: a_owner.key.to_bytes(),
                    mint: escrow.mint.to_bytes(),
                    escrow: a_escrow.key.to_bytes(),
                };
                state::init_game(&mut data, &header, &game)?;
                msg!("Created game: max_players {}, deposits {}..={}",
                    config.max_players, config.min_deposit, config.max_deposit);
            },
            Instruction::JoinGame { amount } => {
                msg!("Instruction: JoinGame");
                accounts::expect_len(accounts, 5)?;
                let a_player = &accounts[0];
                let a_record = &accounts[1];
                let a_holding = &accounts[2];
                let a_escrow = &accounts[3];
                let a_token = &accounts[4];

                accounts::expect_signer(a_player)?;
                accounts::expect_writable(a_record)?;
                accounts::expect_writable(a_holding)?;
                accounts::expect_writable(a_escrow)?;
                accounts::expect_token_program(a_token)?;

                let mut data = state::record_data_mut(a_record)?;
                record_guard(program_id, a_record, &data)?;
                let (header, mut game) = state::load_game(&data)?;

                verify_escrow(program_id, a_record, a_escrow, &header)?;
                let holding = unpack_holding(a_holding, &Pubkey::new_from_array(header.mint))?;
                if holding.owner != *a_player.key { return Err(CashGameError::Unauthorized.into()); }

                game.join(a_player.key.to_bytes(), amount).map_err(map_engine_error)?;

                ledger::deposit(a_token, a_holding, a_escrow, a_player, amount)?;
                check_conservation(a_escrow, &game)?;
                state::store_game(&mut data, &game)?;
                msg!("{} joined with {}", a_player.key, amount);
            },
            Instruction::SetStatus { status } => {
                msg!("Instruction: SetStatus");
                accounts::expect_len(accounts, 2)?;
                let a_owner = &accounts[0];
                let a_record = &accounts[1];

                accounts::expect_signer(a_owner)?;
                accounts::expect_writable(a_record)?;

                let mut data = state::record_data_mut(a_record)?;
                record_guard(program_id, a_record, &data)?;
                let (_, mut game) = state::load_game(&data)?;

                game.set_status(&a_owner.key.to_bytes(), status).map_err(map_engine_error)?;
                state::store_game(&mut data, &game)?;
            },
            Instruction::AddChips { amount } => {
                msg!("Instruction: AddChips");
                accounts::expect_len(accounts, 5)?;
                let a_player = &accounts[0];
                let a_record = &accounts[1];
                let a_holding = &accounts[2];
                let a_escrow = &accounts[3];
                let a_token = &accounts[4];

                accounts::expect_signer(a_player)?;
                accounts::expect_writable(a_record)?;
                accounts::expect_writable(a_holding)?;
                accounts::expect_writable(a_escrow)?;
                accounts::expect_token_program(a_token)?;

                let mut data = state::record_data_mut(a_record)?;
                record_guard(program_id, a_record, &data)?;
                let (header, mut game) = state::load_game(&data)?;

                verify_escrow(program_id, a_record, a_escrow, &header)?;
                let holding = unpack_holding(a_holding, &Pubkey::new_from_array(header.mint))?;
                if holding.owner != *a_player.key { return Err(CashGameError::Unauthorized.into()); }

                game.add_chips(&a_player.key.to_bytes(), amount).map_err(map_engine_error)?;

                ledger::deposit(a_token, a_holding, a_escrow, a_player, amount)?;
                check_conservation(a_escrow, &game)?;
                state::store_game(&mut data, &game)?;
                msg!("{} added {} ({:?})", a_player.key, amount, game.status);
            },
            Instruction::Settle { settlements } => {
                msg!("Instruction: Settle");
                accounts::expect_len(accounts, 5)?;
                let a_owner = &accounts[0];
                let a_record = &accounts[1];
                let a_escrow = &accounts[2];
                let a_authority = &accounts[3];
                let a_token = &accounts[4];
                let destinations = &accounts[5..];

                accounts::expect_signer(a_owner)?;
                accounts::expect_writable(a_record)?;
                accounts::expect_writable(a_escrow)?;
                accounts::expect_token_program(a_token)?;

                let mut data = state::record_data_mut(a_record)?;
                record_guard(program_id, a_record, &data)?;
                let (header, mut game) = state::load_game(&data)?;
                let escrow = verify_escrow(program_id, a_record, a_escrow, &header)?;
                let mint = Pubkey::new_from_array(header.mint);

                #[cfg(feature = "cu-audit")]
                {
                    msg!("CU_CHECKPOINT: settle_plan_start");
                    sol_log_compute_units();
                }

                let payouts = game
                    .settle(&a_owner.key.to_bytes(), &settlements, destinations.len())
                    .map_err(map_engine_error)?;

                #[cfg(feature = "cu-audit")]
                {
                    msg!("CU_CHECKPOINT: settle_plan_end");
                    sol_log_compute_units();
                }

                // Every destination is checked before the first transfer.
                let mut total = 0u64;
                for (payout, dest) in payouts.iter().zip(destinations) {
                    verify_destination(dest, &mint, payout)?;
                    total = total.checked_add(payout.amount).ok_or(CashGameError::ArithmeticOverflow)?;
                }
                if escrow.amount < total { return Err(CashGameError::EscrowShortfall.into()); }

                let signer = EscrowSigner::new(program_id, a_record.key, a_authority, header.escrow_bump)?;
                for (payout, dest) in payouts.iter().zip(destinations) {
                    ledger::release(a_token, a_escrow, dest, &signer, payout.amount)?;
                }

                #[cfg(feature = "cu-audit")]
                {
                    msg!("CU_CHECKPOINT: settle_payout_end");
                    sol_log_compute_units();
                }

                check_conservation(a_escrow, &game)?;
                state::store_game(&mut data, &game)?;
                msg!("Settled: {} seated, {} paid out ({} total)", game.players.len(), payouts.len(), total);
            },
            Instruction::CloseGame => {
                msg!("Instruction: CloseGame");
                accounts::expect_len(accounts, 6)?;
                let a_owner = &accounts[0];
                let a_record = &accounts[1];
                let a_escrow = &accounts[2];
                let a_owner_holding = &accounts[3];
                let a_authority = &accounts[4];
                let a_token = &accounts[5];

                accounts::expect_signer(a_owner)?;
                accounts::expect_writable(a_owner)?;
                accounts::expect_writable(a_record)?;
                accounts::expect_writable(a_escrow)?;
                accounts::expect_writable(a_owner_holding)?;
                accounts::expect_token_program(a_token)?;

                let (header, game) = {
                    let data = a_record.try_borrow_data()?;
                    record_guard(program_id, a_record, &data)?;
                    state::load_game(&data)?
                };

                game.close(&a_owner.key.to_bytes()).map_err(map_engine_error)?;

                let escrow = verify_escrow(program_id, a_record, a_escrow, &header)?;
                let holding = unpack_holding(a_owner_holding, &Pubkey::new_from_array(header.mint))?;
                if holding.owner != *a_owner.key { return Err(CashGameError::InvalidTokenAccount.into()); }

                let signer = EscrowSigner::new(program_id, a_record.key, a_authority, header.escrow_bump)?;
                ledger::release(a_token, a_escrow, a_owner_holding, &signer, escrow.amount)?;
                ledger::close_escrow(a_token, a_escrow, a_owner, &signer)?;
                state::reclaim(a_record, a_owner)?;
                msg!("Closed game, swept {} to owner", escrow.amount);
            },
        }
        Ok(())
    }

    /// The Nth destination must be a token account of the game's mint owned
    /// by the Nth removed player.
    fn verify_destination(dest: &AccountInfo, mint: &Pubkey, payout: &Payout) -> Result<(), ProgramError> {
        accounts::expect_writable(dest)?;
        let tok = unpack_holding(dest, mint)?;
        if tok.owner.to_bytes() != payout.address {
            return Err(CashGameError::AccountMismatch.into());
        }
        Ok(())
    }
}

// 8. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
#[allow(unsafe_code)]
pub mod entrypoint {
    use crate::processor;
    #[allow(unused_imports)]
    use alloc::format; // Required by entrypoint! macro in SBF builds
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult, pubkey::Pubkey,
    };

    entrypoint!(process_instruction);

    fn process_instruction<'a>(
        program_id: &Pubkey,
        accounts: &'a [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        processor::process_instruction(program_id, accounts, instruction_data)
    }
}
