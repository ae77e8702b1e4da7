//! x86-64 jump encoding and prologue measurement.
//!
//! Hook installation displaces the first instructions of a target function.
//! The decoder here measures whole instructions over the subset that appears
//! in compiler prologues; anything position-dependent (relative branches,
//! RIP-relative operands) cannot be moved into a trampoline byte-for-byte and
//! makes the measurement fail, which callers surface as an install failure.

/// `jmp rel32` length.
pub const JMP_REL32_LEN: usize = 5;

/// `jmp [rip+0]; dq target` length.
pub const JMP_ABS_LEN: usize = 14;

/// Encode `jmp rel32` from `from` to `to`, or `None` when the displacement
/// does not fit.
pub fn jmp_rel32(from: u64, to: u64) -> Option<[u8; JMP_REL32_LEN]> {
    let displacement = (to as i64).wrapping_sub(from as i64 + JMP_REL32_LEN as i64);
    let displacement = i32::try_from(displacement).ok()?;

    let mut code = [0u8; JMP_REL32_LEN];
    code[0] = 0xE9;
    code[1..5].copy_from_slice(&displacement.to_le_bytes());
    Some(code)
}

/// Encode an absolute indirect jump: `FF 25 00000000` followed by the
/// 64-bit target. Works from any address.
pub fn jmp_abs(to: u64) -> [u8; JMP_ABS_LEN] {
    let mut code = [0u8; JMP_ABS_LEN];
    code[0] = 0xFF;
    code[1] = 0x25;
    code[6..14].copy_from_slice(&to.to_le_bytes());
    code
}

/// Measure whole instructions from the start of `code` until at least
/// `needed` bytes are covered. `None` when an instruction cannot be decoded
/// or cannot be relocated.
pub fn displaced_length(code: &[u8], needed: usize) -> Option<usize> {
    let mut covered = 0usize;
    while covered < needed {
        covered += instruction_length(&code[covered..])?;
    }
    Some(covered)
}

/// Length of the instruction at the start of `code`, for the prologue subset.
pub fn instruction_length(code: &[u8]) -> Option<usize> {
    let mut index = 0usize;
    let mut operand_size_16 = false;

    // Legacy and REX prefixes.
    let mut rex_w = false;
    loop {
        let byte = *code.get(index)?;
        match byte {
            0x66 => {
                operand_size_16 = true;
                index += 1;
            }
            0xF2 | 0xF3 | 0x2E | 0x36 | 0x3E | 0x26 | 0x64 | 0x65 => index += 1,
            0x40..=0x4F => {
                rex_w = byte & 0x08 != 0;
                index += 1;
            }
            _ => break,
        }
    }

    let opcode = *code.get(index)?;
    index += 1;

    let imm32 = if operand_size_16 { 2 } else { 4 };

    match opcode {
        // push/pop r64
        0x50..=0x5F => Some(index),
        // push imm8 / imm32
        0x6A => Some(index + 1),
        0x68 => Some(index + imm32),
        // nop / int3 / ret
        0x90 | 0xCC | 0xC3 => Some(index),
        0xC2 => Some(index + 2),
        // ALU r/m forms: add, or, adc, sbb, and, sub, xor, cmp, test, mov,
        // lea, movsxd
        0x00..=0x03
        | 0x08..=0x0B
        | 0x10..=0x13
        | 0x18..=0x1B
        | 0x20..=0x23
        | 0x28..=0x2B
        | 0x30..=0x33
        | 0x38..=0x3B
        | 0x63
        | 0x84..=0x8B
        | 0x8D => modrm_length(&code[index..]).map(|m| index + m),
        // group-1 immediates
        0x80 | 0x83 => modrm_length(&code[index..]).map(|m| index + m + 1),
        0x81 => modrm_length(&code[index..]).map(|m| index + m + imm32),
        // mov r8, imm8 / mov r, imm
        0xB0..=0xB7 => Some(index + 1),
        0xB8..=0xBF => Some(index + if rex_w { 8 } else { imm32 }),
        // mov r/m, imm
        0xC6 => modrm_length(&code[index..]).map(|m| index + m + 1),
        0xC7 => modrm_length(&code[index..]).map(|m| index + m + imm32),
        // group-5 (inc/dec/call/jmp/push on r/m); indirect forms relocate
        // as long as the operand is not RIP-relative, which modrm_length
        // rejects.
        0xFF => modrm_length(&code[index..]).map(|m| index + m),
        // two-byte opcodes
        0x0F => {
            let second = *code.get(index)?;
            index += 1;
            match second {
                // long nop
                0x1F => modrm_length(&code[index..]).map(|m| index + m),
                // movzx / movsx
                0xB6 | 0xB7 | 0xBE | 0xBF => modrm_length(&code[index..]).map(|m| index + m),
                // setcc
                0x90..=0x9F => modrm_length(&code[index..]).map(|m| index + m),
                // relative jcc and the rest: not relocatable / not decoded
                _ => None,
            }
        }
        // relative call/jmp/jcc: never relocatable byte-for-byte
        0x70..=0x7F | 0xE8 | 0xE9 | 0xEB => None,
        _ => None,
    }
}

/// Bytes consumed by a ModRM operand (ModRM itself, SIB, displacement).
/// `None` for RIP-relative addressing, which cannot move.
fn modrm_length(code: &[u8]) -> Option<usize> {
    let modrm = *code.get(0)?;
    let mode = modrm >> 6;
    let rm = modrm & 0x07;

    if mode == 0b11 {
        return Some(1);
    }
    if mode == 0b00 && rm == 0b101 {
        // RIP-relative
        return None;
    }

    let mut length = 1usize;
    if rm == 0b100 {
        let sib = *code.get(1)?;
        length += 1;
        if mode == 0b00 && sib & 0x07 == 0b101 {
            length += 4;
        }
    }
    match mode {
        0b01 => length += 1,
        0b10 => length += 4,
        _ => {}
    }
    Some(length)
}
