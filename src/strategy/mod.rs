//! Discovery strategies

use std::fmt;

use clap::ValueEnum;

use crate::{
    Address, CpuState, DecodeResult, Decoder, Instruction, ResourcerError, Session,
    MAX_INSTRUCTION_SIZE,
};

/// Static discovery strategies selectable from the command line.
#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Decode straight ahead from each seed until a terminator
    Linear,
    /// Follow every branch edge from each seed (flood fill)
    #[default]
    Recursive,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Linear => write!(f, "Linear sweep"),
            Strategy::Recursive => write!(f, "Recursive descent"),
        }
    }
}

impl Strategy {
    /// Run the strategy from every seed, each starting in `state`.
    pub fn run(
        &self,
        session: &mut Session,
        decoder: &mut dyn Decoder,
        seeds: &[Address],
        state: CpuState,
    ) -> recursive::DiscoveryStats {
        match self {
            Strategy::Linear => {
                let mut stats = recursive::DiscoveryStats::default();
                for &seed in seeds {
                    decoder.set_state(state);
                    stats.steps += 1;
                    match linear::sweep(session, decoder, seed, None) {
                        Ok((_, committed)) => stats.committed += committed,
                        Err(e) => {
                            log::debug!("Linear sweep from ${:06X} failed: {}", seed, e);
                            stats.failed += 1;
                        }
                    }
                }
                stats
            }
            Strategy::Recursive => {
                let mut worklist = recursive::Worklist::new();
                for &seed in seeds {
                    worklist.seed(seed, state);
                }
                recursive::run(session, decoder, &mut worklist)
            }
        }
    }
}

/// Decode one instruction at CPU `address` from ROM offset `offset`, growing
/// the byte window while the decoder asks for more.
pub(crate) fn decode_at(
    session: &Session,
    decoder: &mut dyn Decoder,
    address: Address,
    offset: Address,
) -> Result<(Instruction, usize), ResourcerError> {
    let mut window = MAX_INSTRUCTION_SIZE;
    loop {
        let bytes = session.fetch_bytes(offset, window);
        match decoder.decode_next(bytes, address) {
            DecodeResult::NeedMoreBytes(n) => {
                let wanted = bytes.len() + n;
                if n == 0 || session.fetch_bytes(offset, wanted).len() < wanted {
                    return Err(ResourcerError::NeedMoreBytes(n));
                }
                window = wanted;
            }
            other => return other.into_result(),
        }
    }
}

pub mod linear;
pub mod recursive;
pub mod trace;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::decoder::W65816Decoder;
    use crate::mapping::MappingMode;
    use crate::{AddressSpace, RegionKind, W65816State};

    fn session(rom: Vec<u8>) -> Session {
        let config = SessionConfig {
            mapping: MappingMode::Identity,
            ..Default::default()
        };
        Session::new(rom, config).unwrap()
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(Strategy::Linear.to_string(), "Linear sweep");
        assert_eq!(Strategy::default().to_string(), "Recursive descent");
    }

    #[test]
    fn test_decode_at_end_of_image() {
        let s = session(vec![0xEA, 0xAD, 0x00]);
        let mut decoder = W65816Decoder::new();
        let (nop, n) = decode_at(&s, &mut decoder, 0, 0).unwrap();
        assert_eq!((nop.mnemonic.as_str(), n), ("NOP", 1));
        assert!(matches!(
            decode_at(&s, &mut decoder, 1, 1),
            Err(ResourcerError::NeedMoreBytes(1))
        ));
    }

    #[test]
    fn test_linear_and_recursive_strategies() {
        // JSR $0005; RTS; NOP; NOP; RTS
        let rom = vec![0x20, 0x05, 0x00, 0x60, 0xEA, 0xEA, 0x60];
        let state = CpuState::W65816(W65816State::new());

        let mut linear = session(rom.clone());
        let stats = Strategy::Linear.run(&mut linear, &mut W65816Decoder::new(), &[0], state);
        // JSR and RTS, counted per instruction like the flood fill
        assert_eq!(stats.steps, 1);
        assert_eq!(stats.committed, 2);
        // the sweep stops at the RTS and never follows the call
        assert_eq!(linear.ledger(AddressSpace::Rom).kind_at(5), Some(RegionKind::Unknown));

        let mut recursive = session(rom);
        let stats = Strategy::Recursive.run(&mut recursive, &mut W65816Decoder::new(), &[0], state);
        assert_eq!(stats.committed, 4);
        assert_eq!(recursive.ledger(AddressSpace::Rom).kind_at(5), Some(RegionKind::Code));
        assert_eq!(recursive.ledger(AddressSpace::Rom).kind_at(4), Some(RegionKind::Unknown));
    }
}
