//
// Shiva ELF interpreter and patch engine
//
//! Instruction patch encode/decode for the three breakpoint kinds
//! (spec §4.5 "Patch encoding"). x86_64 `call`/`jmp rel32` forms only;
//! aarch64 uses the fixed-width `bl`/`b` encodings from `module::reloc`'s
//! 26-bit immediate scheme.
pub const CALL_INSN_LEN: usize = 5;
pub const JMP_INSN_LEN: usize = 5;
pub const INT3_INSN_LEN: usize = 1;

const OPCODE_CALL_REL32: u8 = 0xe8;
const OPCODE_JMP_REL32: u8 = 0xe9;
const OPCODE_INT3: u8 = 0xcc;

/// Builds a `call rel32` whose displacement, measured from the instruction
/// following the patched site, lands on `target`.
pub fn encode_call(site_addr: u64, target: u64) -> Vec<u8> {
    encode_rel32(OPCODE_CALL_REL32, site_addr, target)
}

pub fn encode_jmp(site_addr: u64, target: u64) -> Vec<u8> {
    encode_rel32(OPCODE_JMP_REL32, site_addr, target)
}

pub fn encode_int3() -> u8 {
    OPCODE_INT3
}

fn encode_rel32(opcode: u8, site_addr: u64, target: u64) -> Vec<u8> {
    let next_insn = site_addr + CALL_INSN_LEN as u64;
    let disp = (target as i64 - next_insn as i64) as i32;
    let mut out = Vec::with_capacity(CALL_INSN_LEN);
    out.push(opcode);
    out.extend_from_slice(&disp.to_le_bytes());
    out
}

/// Recovers the absolute target of a previously-encoded `call`/`jmp rel32`
/// breakpoint, used to rebuild the original call in the call-original
/// trampoline.
pub fn decode_rel32_target(site_addr: u64, bytes: &[u8]) -> Option<u64> {
    if bytes.len() < CALL_INSN_LEN || (bytes[0] != OPCODE_CALL_REL32 && bytes[0] != OPCODE_JMP_REL32) {
        return None;
    }
    let disp = i32::from_le_bytes(bytes[1..5].try_into().ok()?);
    let next_insn = site_addr + CALL_INSN_LEN as u64;
    Some((next_insn as i64 + disp as i64) as u64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encode_call_roundtrips_through_decode() {
        let site = 0x401000u64;
        let target = 0x402000u64;
        let bytes = encode_call(site, target);
        assert_eq!(bytes[0], OPCODE_CALL_REL32);
        assert_eq!(decode_rel32_target(site, &bytes), Some(target));
    }

    #[test]
    fn test_encode_jmp_negative_displacement() {
        let site = 0x402000u64;
        let target = 0x401000u64;
        let bytes = encode_jmp(site, target);
        assert_eq!(bytes[0], OPCODE_JMP_REL32);
        assert_eq!(decode_rel32_target(site, &bytes), Some(target));
    }

    #[test]
    fn test_decode_rejects_unrecognized_opcode() {
        let bytes = [0x90, 0, 0, 0, 0];
        assert_eq!(decode_rel32_target(0x1000, &bytes), None);
    }

    #[test]
    fn test_encode_int3_is_single_trap_byte() {
        assert_eq!(encode_int3(), 0xcc);
    }
}
