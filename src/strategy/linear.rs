//! Linear code-range commit: decode straight ahead from one address.

use super::decode_at;
use crate::{Address, AddressSpace, Decoder, Instruction, ResourcerError, Session};

/// Decode forward from CPU `address`, committing each instruction as Code.
///
/// Stops at the first instruction whose bytes are not all Unknown, before
/// the first instruction that would run past `end` when given, otherwise
/// after the first terminator. An instruction that is not committed leaves
/// the decoder in the state it had before decoding it.
///
/// Fails only when nothing could be committed; the error then explains why
/// the very first instruction was refused.
pub fn run(
    session: &mut Session,
    decoder: &mut dyn Decoder,
    address: Address,
    end: Option<Address>,
) -> Result<Instruction, ResourcerError> {
    sweep(session, decoder, address, end).map(|(last, _)| last)
}

/// Like [`run`], also returning how many instructions were committed.
pub fn sweep(
    session: &mut Session,
    decoder: &mut dyn Decoder,
    address: Address,
    end: Option<Address>,
) -> Result<(Instruction, u64), ResourcerError> {
    log::debug!(
        "Committing code from ${:06X}{}",
        address,
        end.map(|e| format!(" to ${:06X}", e)).unwrap_or_default()
    );

    let mut at = address;
    let mut last: Option<Instruction> = None;
    let mut committed = 0;

    while end.map_or(true, |end| at <= end) {
        let offset = match rom_offset(session, at) {
            Ok(offset) => offset,
            Err(e) if last.is_none() => return Err(e),
            Err(e) => {
                log::debug!("Stopping at ${:06X}: {}", at, e);
                break;
            }
        };

        let before = decoder.state();
        let (instruction, consumed) = match decode_at(session, decoder, at, offset) {
            Ok(decoded) => decoded,
            Err(e) if last.is_none() => return Err(e),
            Err(e) => {
                log::debug!("Stopping at ${:06X}: {}", at, e);
                break;
            }
        };

        let last_byte = at + consumed as Address - 1;
        if let Some(end) = end.filter(|&end| last_byte > end) {
            log::debug!("Stopping at {}: it runs past ${:06X}", instruction, end);
            decoder.set_state(before);
            break;
        }

        let span_end = offset + consumed as Address - 1;
        if !session.region_is_unknown(AddressSpace::Rom, offset, span_end) {
            decoder.set_state(before);
            if last.is_some() {
                break;
            }
        }
        // records the conflict when the first instruction is refused
        session.commit_instruction(offset, instruction.clone())?;
        committed += 1;

        let stop = end.is_none() && instruction.is_terminator;
        at = instruction.fallthrough();
        last = Some(instruction);
        if stop {
            break;
        }
    }

    match last {
        Some(last) => Ok((last, committed)),
        None => Err(ResourcerError::InvalidRange(format!(
            "no instruction fits inside ${:06X}-${:06X}",
            address,
            end.unwrap_or(address)
        ))),
    }
}

/// ROM offset of a CPU address that must hold code.
fn rom_offset(session: &Session, address: Address) -> Result<Address, ResourcerError> {
    match session.map_address_to_space(address) {
        Some((offset, AddressSpace::Rom)) => Ok(offset),
        Some((_, space)) => Err(ResourcerError::NoImageBytes { address, space }),
        None => Err(ResourcerError::UnmappedAddress(address)),
    }
}
